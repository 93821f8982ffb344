//! libturkce crate root
//!
//! Turkish reference data and a high-level `Engine` over the shared
//! `libsuggest-core` components.
//!
//! Public API exported here:
//! - `Engine` from `engine`
//! - `TurkceConfig` from `config`
//! - `ReferenceData` from `data`
//! - keyword tables and confusion pairs from `locale`

pub mod config;
pub mod data;
pub mod engine;
pub mod locale;

pub use config::TurkceConfig;
pub use data::ReferenceData;
pub use engine::Engine;

// Convenience re-exports for common types used by callers.
pub use libsuggest_core::{
    ContextAnalysis, ConversationFlow, Correction, Intent, PredictionFusion, ReplacementMode,
    RequestScheduler, Sentiment, SourceKind, StateStore, Suggestion,
};
