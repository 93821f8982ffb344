//! libsuggest-core
//!
//! Prediction sources, fusion ranking and request scheduling shared by the
//! language crates (libturkce).
//!
//! Reference data (lexicon, templates, keyword sets) is supplied by the
//! language crate; this crate holds no natural-language tables of its own.
//!
//! Public API:
//! - `Suggestion` - Scored, source-tagged suggestion with a replacement mode
//! - `Lexicon` - Ranked common words (FST), n-gram seeds and corrections
//! - `NGramPredictor` - 1..4-gram next-word prediction and word completion
//! - `SpellCorrector` - Bounded edit-distance correction with confusion pairs
//! - `HistoryStore` - Personal phrase/word frequency learner with recency
//! - `TemplateIndex` - Trigger and free-text template lookup
//! - `ContextClassifier` - Intent/sentiment voting and suggestion re-ranking
//! - `PredictionFusion` - Orchestrator with TTL result cache
//! - `RequestScheduler` - Bounded async request queue with drop-oldest overflow
//! - `StateStore` - In-memory or redb key-value persistence
//! - `Config` - Configuration and feature flags
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod candidate;
pub use candidate::{ReplacementMode, SourceKind, Suggestion};

pub mod lexicon;
pub use lexicon::{Lexicon, LexiconData};

pub mod fuzzy;
pub use fuzzy::{ConfusionMap, ConfusionRule};

pub mod ngram;
pub use ngram::{NGramCandidate, NGramConfig, NGramPredictor, NGramStats, NGramWeights};

pub mod spell;
pub use spell::{Correction, SpellConfig, SpellCorrector};

pub mod history;
pub use history::{
    EntryKind, FrequencyEntry, HistoryConfig, HistoryMatch, HistoryMessage, HistorySnapshot,
    HistoryStats, HistoryStore,
};

pub mod templates;
pub use templates::{
    CategorySummary, Template, TemplateCategory, TemplateConfig, TemplateIndex, TemplateMatch,
    TemplateSet,
};

pub mod context;
pub use context::{
    BoostRule, ContextAnalysis, ContextClassifier, ContextLexicon, ConversationFlow,
    ConversationTracker, Intent, Sentiment, TrackedAnalysis,
};

pub mod engine;
pub use engine::{
    CacheConfig, FusionBuilder, Label, PredictionFusion, SourceToggles, SourceWeights,
    SuggestionLabels,
};

pub mod scheduler;
pub use scheduler::{
    CancelToken, PredictionHandle, PredictionResult, RequestScheduler, Resolution, SchedulerConfig,
    SchedulerState, SchedulerStats,
};

pub mod store;
pub use store::StateStore;

/// Generic configuration for the suggestion engine.
///
/// This config contains only language-agnostic fields. Language-specific
/// options (data locations, keyword tables) belong in the language crate's
/// config, which flattens this one.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of fused suggestions returned per request
    pub max_suggestions: usize,

    /// Input prefix that switches prediction into template command search
    pub command_marker: String,

    /// Lowercase `I` to `ı` and `İ` to `i` (Turkish/Azeri casing rules)
    pub turkic_casing: bool,

    /// Per-source base weights on the shared scoring scale
    pub weights: SourceWeights,

    /// Which prediction sources take part in fusion
    pub sources: SourceToggles,

    pub ngram: NGramConfig,
    pub spell: SpellConfig,
    pub history: HistoryConfig,
    pub templates: TemplateConfig,

    /// Fusion result cache (input -> suggestions)
    pub cache: CacheConfig,

    pub scheduler: SchedulerConfig,

    /// Descriptions and icons attached to suggestions
    pub labels: SuggestionLabels,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_suggestions: 7,
            command_marker: "/".to_string(),
            turkic_casing: false,
            weights: SourceWeights::default(),
            sources: SourceToggles::default(),
            ngram: NGramConfig::default(),
            spell: SpellConfig::default(),
            history: HistoryConfig::default(),
            templates: TemplateConfig::default(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            labels: SuggestionLabels::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from TOML string.
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml_string(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Tokenizer configured with this config's casing rules.
    pub fn tokenizer(&self) -> utils::Tokenizer {
        utils::Tokenizer::new(self.turkic_casing)
    }

    // ========== Source Management ==========

    /// Enable or disable a prediction source.
    pub fn set_source_enabled(&mut self, source: SourceKind, enabled: bool) {
        self.sources.set(source, enabled);
    }

    pub fn is_source_enabled(&self, source: SourceKind) -> bool {
        self.sources.is_enabled(source)
    }

    // ========== Scoring Weights ==========

    /// Set the base weight of a source. Negative values are clamped to zero.
    pub fn set_weight(&mut self, source: SourceKind, weight: f32) {
        self.weights.set(source, weight.max(0.0));
    }

    pub fn weight(&self, source: SourceKind) -> f32 {
        self.weights.get(source)
    }

    // ========== Command Marker ==========

    /// Set the command marker. Empty markers are ignored.
    pub fn set_command_marker(&mut self, marker: &str) {
        if !marker.is_empty() {
            self.command_marker = marker.to_string();
        }
    }

    pub fn is_command(&self, input: &str) -> bool {
        input.trim_start().starts_with(&self.command_marker)
    }
}

pub mod utils {
    use serde::{Deserialize, Serialize};
    use unicode_normalization::UnicodeNormalization;

    /// Normalize input strings (NFC) and trim whitespace.
    pub fn normalize(s: &str) -> String {
        s.nfc().collect::<String>().trim().to_string()
    }

    /// Current wall-clock time in unix milliseconds.
    pub fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Length in chars, not bytes.
    pub fn char_len(s: &str) -> usize {
        s.chars().count()
    }

    /// Split input at its last whitespace boundary into `(context, last_token)`.
    ///
    /// Context is trimmed. Trailing whitespace yields an empty last token, which
    /// is how callers distinguish "predict the next word" from "complete this
    /// word".
    pub fn split_last_token(input: &str) -> (&str, &str) {
        match input.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            Some((idx, ch)) => (input[..idx].trim(), &input[idx + ch.len_utf8()..]),
            None => ("", input),
        }
    }

    /// Locale-aware lowercase + tokenizer.
    ///
    /// Tokens are NFC-normalized, lower-cased and punctuation-stripped; any
    /// char that is not alphanumeric, `_` or whitespace acts as a separator.
    /// Accented letters are ordinary alphabet members.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Tokenizer {
        pub turkic_casing: bool,
    }

    impl Tokenizer {
        pub fn new(turkic_casing: bool) -> Self {
            Self { turkic_casing }
        }

        /// NFC + lowercase without trimming.
        pub fn fold_case(&self, s: &str) -> String {
            let mut out = String::with_capacity(s.len());
            for ch in s.nfc() {
                match ch {
                    'I' if self.turkic_casing => out.push('ı'),
                    'İ' if self.turkic_casing => out.push('i'),
                    _ => out.extend(ch.to_lowercase()),
                }
            }
            out
        }

        /// Lower-cased, trimmed form used as a lookup key.
        pub fn key(&self, s: &str) -> String {
            self.fold_case(s.trim())
        }

        pub fn tokenize(&self, text: &str) -> Vec<String> {
            let folded = self.fold_case(text);
            let cleaned: String = folded
                .chars()
                .map(|c| {
                    if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                        c
                    } else {
                        ' '
                    }
                })
                .collect();
            cleaned
                .split_whitespace()
                .map(|t| t.to_string())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::utils::{split_last_token, Tokenizer};
    use super::*;

    #[test]
    fn tokenizer_strips_punctuation_and_lowercases() {
        let tok = Tokenizer::new(false);
        assert_eq!(
            tok.tokenize("Merhaba, nasılsınız?  Güzel günler!"),
            vec!["merhaba", "nasılsınız", "güzel", "günler"]
        );
        assert_eq!(tok.tokenize("sipariş-durum_2"), vec!["sipariş", "durum_2"]);
    }

    #[test]
    fn turkic_casing_maps_dotted_and_dotless_i() {
        let tok = Tokenizer::new(true);
        assert_eq!(tok.tokenize("IŞIK İyi"), vec!["ışık", "iyi"]);
        assert_eq!(tok.key("  SIKINTI  "), "sıkıntı");
    }

    #[test]
    fn whitespace_only_input_has_no_tokens() {
        let tok = Tokenizer::default();
        assert!(tok.tokenize("   \t ").is_empty());
        assert!(tok.tokenize("?!.,").is_empty());
    }

    #[test]
    fn split_last_token_cases() {
        assert_eq!(split_last_token("merhaba nas"), ("merhaba", "nas"));
        assert_eq!(split_last_token("merhaba "), ("merhaba", ""));
        assert_eq!(split_last_token("tek"), ("", "tek"));
        assert_eq!(split_last_token("iyi  günler di"), ("iyi  günler", "di"));
    }

    #[test]
    fn config_toml_round_trip_with_partial_sections() {
        let cfg = Config::from_toml_str(
            r#"
            max_suggestions = 5
            turkic_casing = true

            [weights]
            template = 12.0
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.max_suggestions, 5);
        assert!(cfg.turkic_casing);
        assert_eq!(cfg.weight(SourceKind::Template), 12.0);
        // untouched sections keep their defaults
        assert_eq!(cfg.weight(SourceKind::History), 8.0);
        assert_eq!(cfg.cache.ttl_ms, 5000);

        let text = cfg.to_toml_string().expect("serialize");
        let back = Config::from_toml_str(&text).expect("reparse");
        assert_eq!(back.max_suggestions, 5);
        assert_eq!(back.weight(SourceKind::Template), 12.0);
    }

    #[test]
    fn config_source_toggles() {
        let mut cfg = Config::default();
        assert!(cfg.is_source_enabled(SourceKind::SpellCheck));
        cfg.set_source_enabled(SourceKind::SpellCheck, false);
        assert!(!cfg.is_source_enabled(SourceKind::SpellCheck));
        cfg.set_weight(SourceKind::NGram, -3.0);
        assert_eq!(cfg.weight(SourceKind::NGram), 0.0);
    }

    #[test]
    fn command_marker_detection() {
        let mut cfg = Config::default();
        assert!(cfg.is_command("/merhaba"));
        assert!(!cfg.is_command("merhaba"));
        cfg.set_command_marker("");
        assert_eq!(cfg.command_marker, "/");
        cfg.set_command_marker("#");
        assert!(cfg.is_command("#kargo"));
    }
}
