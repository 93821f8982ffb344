//! Turkish configuration that extends the base `Config` from core.
//!
//! This configuration includes:
//! - All generic options from `libsuggest_core::Config` (flattened via serde)
//! - Turkish defaults: Turkic casing, confusion pairs, vowel set, labels
//! - Data and state locations
//!
//! # Example
//!
//! ```rust
//! use libturkce::TurkceConfig;
//!
//! let config = TurkceConfig::default();
//! assert!(config.base().turkic_casing);
//! let base_config = config.into_base();
//! assert_eq!(base_config.max_suggestions, 7);
//! ```

use crate::locale;
use libsuggest_core::{Config, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TurkceConfig {
    /// Base configuration fields (weights, sources, caches, etc.)
    #[serde(flatten)]
    pub base: Config,

    /// Directory whose lexicon/templates/phrases JSON files override the
    /// bundled tables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// redb database holding learned state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,

    /// Save learned state after every `learn`
    pub autosave: bool,
}

impl Default for TurkceConfig {
    fn default() -> Self {
        let mut base = Config {
            turkic_casing: true,
            labels: locale::labels(),
            ..Config::default()
        };
        base.spell.vowels = locale::VOWELS.to_string();
        base.spell.confusions = locale::confusion_rules();
        base.templates.custom_category_name = "Özel".to_string();
        base.templates.apology_cues = locale::APOLOGY_CUES.iter().map(|s| s.to_string()).collect();
        base.scheduler.prefetch_chars = locale::PREFETCH_CHARS.to_string();

        Self {
            base,
            data_dir: None,
            state_path: None,
            autosave: false,
        }
    }
}

impl TurkceConfig {
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parse TOML on top of the Turkish defaults.
    ///
    /// Keys absent from `content` keep their `TurkceConfig::default()` value,
    /// including keys inside the flattened base sections.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut merged = toml::Value::try_from(Self::default())?;
        let parsed: toml::Value = toml::from_str(content)?;
        overlay(&mut merged, parsed);
        Ok(merged.try_into()?)
    }

    pub fn to_toml_string(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Convert this config into the base config
    pub fn into_base(self) -> Config {
        self.base
    }

    /// Get a reference to the base config
    pub fn base(&self) -> &Config {
        &self.base
    }

    /// Get a mutable reference to the base config
    pub fn base_mut(&mut self) -> &mut Config {
        &mut self.base
    }
}

fn overlay(base: &mut toml::Value, over: toml::Value) {
    match (base, over) {
        (toml::Value::Table(base), toml::Value::Table(over)) => {
            for (key, value) in over {
                match base.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
