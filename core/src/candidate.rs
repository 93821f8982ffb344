//! Suggestion types produced by prediction sources.
//!
//! This module provides:
//! - `Suggestion`: a scored suggestion tagged with the source that produced it
//! - `SourceKind`: the producing component
//! - `ReplacementMode`: how a consumer applies the suggestion to the input

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Component that produced a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Template,
    History,
    #[serde(rename = "ngram")]
    NGram,
    Dictionary,
    #[serde(rename = "spellcheck")]
    SpellCheck,
    /// Known-misspelling table from the lexicon
    Correction,
    /// Context-driven suggestions (canned responses, context-relevant history)
    Context,
}

impl SourceKind {
    pub const ALL: [SourceKind; 7] = [
        SourceKind::Template,
        SourceKind::History,
        SourceKind::NGram,
        SourceKind::Dictionary,
        SourceKind::SpellCheck,
        SourceKind::Correction,
        SourceKind::Context,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Template => "template",
            SourceKind::History => "history",
            SourceKind::NGram => "ngram",
            SourceKind::Dictionary => "dictionary",
            SourceKind::SpellCheck => "spellcheck",
            SourceKind::Correction => "correction",
            SourceKind::Context => "context",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a suggestion is applied to the text being typed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementMode {
    /// Append after the cursor (next-word predictions after a space)
    InsertAfterCursor,
    /// Replace the partially typed last token
    #[default]
    ReplaceLastToken,
    /// Replace everything typed so far (templates, whole phrases)
    ReplaceEntireInput,
}

impl ReplacementMode {
    /// Apply the suggestion text to `input`.
    pub fn apply(&self, input: &str, text: &str) -> String {
        match self {
            ReplacementMode::InsertAfterCursor => {
                if input.is_empty() || input.ends_with(char::is_whitespace) {
                    format!("{}{}", input, text)
                } else {
                    format!("{} {}", input, text)
                }
            }
            ReplacementMode::ReplaceLastToken => {
                let (head, _) = input
                    .char_indices()
                    .rev()
                    .find(|(_, c)| c.is_whitespace())
                    .map(|(i, c)| input.split_at(i + c.len_utf8()))
                    .unwrap_or(("", input));
                format!("{}{}", head, text)
            }
            ReplacementMode::ReplaceEntireInput => text.to_string(),
        }
    }
}

/// A single suggestion with an associated score.
///
/// Scores share one scale across sources; higher is better and never negative.
/// `context_boost` records the bonus added by context prioritization so that
/// re-applying it starts again from the base score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub source: SourceKind,
    pub score: f32,
    pub replacement: ReplacementMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_hint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub context_boost: f32,
}

impl Suggestion {
    pub fn new<T: Into<String>>(text: T, source: SourceKind, score: f32) -> Self {
        Suggestion {
            text: text.into(),
            source,
            score: score.max(0.0),
            replacement: ReplacementMode::default(),
            description: None,
            icon_hint: None,
            metadata: BTreeMap::new(),
            context_boost: 0.0,
        }
    }

    pub fn with_replacement(mut self, replacement: ReplacementMode) -> Self {
        self.replacement = replacement;
        self
    }

    pub fn with_description<T: Into<String>>(mut self, description: T) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_icon<T: Into<String>>(mut self, icon: T) -> Self {
        self.icon_hint = Some(icon.into());
        self
    }

    pub fn with_meta<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Score before any context boost.
    pub fn base_score(&self) -> f32 {
        (self.score - self.context_boost).max(0.0)
    }

    /// Replace the context boost, keeping the base score.
    pub fn set_context_boost(&mut self, boost: f32) {
        let base = self.base_score();
        self.context_boost = boost;
        self.score = base + boost;
    }
}

/// Sort suggestions by descending score. Stable, so equal scores keep their
/// relative order.
pub fn sort_by_score(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
