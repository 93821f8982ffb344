//! Bundled Turkish reference data.
//!
//! The JSON tables under `data/` are compiled into the crate. A data
//! directory may override any of them file by file; a missing or malformed
//! file falls back to the bundled table with a warning.

use libsuggest_core::{Error, Intent, LexiconData, Result, TemplateSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const LEXICON_JSON: &str = include_str!("../data/lexicon.json");
pub const TEMPLATES_JSON: &str = include_str!("../data/templates.json");
pub const PHRASES_JSON: &str = include_str!("../data/phrases.json");

pub const LEXICON_FILE: &str = "lexicon.json";
pub const TEMPLATES_FILE: &str = "templates.json";
pub const PHRASES_FILE: &str = "phrases.json";

/// Canned responses per intent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhraseData {
    pub responses: BTreeMap<Intent, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub lexicon: LexiconData,
    pub templates: TemplateSet,
    pub phrases: PhraseData,
}

fn parse<T: serde::de::DeserializeOwned>(what: &str, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| Error::ReferenceData(format!("{}: {}", what, e)))
}

impl ReferenceData {
    /// Parse the compiled-in tables.
    pub fn bundled() -> Result<Self> {
        Ok(Self {
            lexicon: parse("lexicon", LEXICON_JSON)?,
            templates: TemplateSet::from_json_str(TEMPLATES_JSON)?,
            phrases: parse("phrases", PHRASES_JSON)?,
        })
    }

    /// Tables from `dir`, falling back per file to the bundled ones.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            lexicon: load_or_bundled(dir, LEXICON_FILE, LEXICON_JSON),
            templates: load_or_bundled(dir, TEMPLATES_FILE, TEMPLATES_JSON),
            phrases: load_or_bundled(dir, PHRASES_FILE, PHRASES_JSON),
        }
    }

    /// `load_dir` when a directory is given, the bundled tables otherwise.
    /// Never fails: unreadable tables degrade to empty ones.
    pub fn load(dir: Option<&Path>) -> Self {
        match dir {
            Some(dir) => Self::load_dir(dir),
            None => Self {
                lexicon: bundled_or_empty("lexicon", LEXICON_JSON),
                templates: bundled_or_empty("templates", TEMPLATES_JSON),
                phrases: bundled_or_empty("phrases", PHRASES_JSON),
            },
        }
    }
}

fn bundled_or_empty<T: serde::de::DeserializeOwned + Default>(what: &str, json: &str) -> T {
    parse(what, json).unwrap_or_else(|err| {
        tracing::warn!(table = what, error = %err, "bundled table unreadable; using empty");
        T::default()
    })
}

fn load_or_bundled<T: serde::de::DeserializeOwned + Default>(dir: &Path, file: &str, bundled: &str) -> T {
    let path = dir.join(file);
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no override; using bundled table");
        return bundled_or_empty(file, bundled);
    }
    match std::fs::read_to_string(&path).map_err(Error::from).and_then(|s| parse(file, &s)) {
        Ok(table) => {
            tracing::info!(path = %path.display(), "loaded reference table");
            table
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "malformed table; using bundled");
            bundled_or_empty(file, bundled)
        }
    }
}
