//! Turkish suggestion engine
//!
//! Wires the bundled (or overridden) reference data into a
//! `PredictionFusion` and keeps the optional state database alongside it.
//! The fusion sits behind an `Arc`, so cloning an `Engine` is cheap and the
//! clones share learned state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::TurkceConfig;
use crate::data::ReferenceData;
use crate::locale;
use libsuggest_core::{
    CategorySummary, ContextAnalysis, ContextClassifier, ConversationFlow, Correction,
    HistoryStore, Lexicon, NGramPredictor, PredictionFusion, RequestScheduler, Result,
    SpellCorrector, StateStore, Suggestion, Template, TemplateIndex, TemplateMatch,
};

#[derive(Clone)]
pub struct Engine {
    fusion: Arc<PredictionFusion>,
    store: Option<Arc<StateStore>>,
    config: Arc<TurkceConfig>,
}

impl Engine {
    /// Build an engine from `config`.
    ///
    /// Reference tables come from `config.data_dir` when set, otherwise from
    /// the bundled data. When `config.state_path` is set the redb database is
    /// opened (created if missing) and learned state is loaded from it.
    pub fn new(config: TurkceConfig) -> Result<Self> {
        let data = ReferenceData::load(config.data_dir.as_deref());
        let store = match &config.state_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Some(StateStore::open_redb(path)?)
            }
            None => None,
        };
        Ok(Self::assemble(config, data, store))
    }

    /// Build an engine from already-loaded reference data without a state
    /// database.
    pub fn with_data(config: TurkceConfig, data: ReferenceData) -> Self {
        Self::assemble(config, data, None)
    }

    /// Bundled data, Turkish defaults, in-memory only.
    pub fn bundled() -> Self {
        Self::with_data(TurkceConfig::default(), ReferenceData::load(None))
    }

    fn assemble(config: TurkceConfig, data: ReferenceData, store: Option<StateStore>) -> Self {
        let base = config.base();
        let tok = base.tokenizer();

        let lexicon = Lexicon::new(data.lexicon, tok).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "lexicon unusable; dictionary sources will be empty");
            Lexicon::empty()
        });
        let ngram = NGramPredictor::from_lexicon(&lexicon, base.ngram.clone(), tok);
        let spell = SpellCorrector::from_lexicon(&lexicon, base.spell.clone(), tok);
        let history = HistoryStore::new(base.history.clone(), tok);
        let templates = TemplateIndex::new(data.templates, base.templates.clone(), tok);
        let classifier = ContextClassifier::new(
            locale::context_lexicon(data.phrases.responses),
            &base.command_marker,
            tok,
        );

        tracing::info!(
            words = lexicon.len(),
            templates = templates.len(),
            "turkish engine assembled"
        );

        let fusion = PredictionFusion::builder(base.clone())
            .lexicon(Arc::new(lexicon))
            .ngram(Arc::new(ngram))
            .spell(Arc::new(spell))
            .history(Arc::new(history))
            .templates(Arc::new(templates))
            .classifier(Arc::new(classifier))
            .build();

        if let Some(store) = &store {
            fusion.load_state(store);
        }

        Self {
            fusion: Arc::new(fusion),
            store: store.map(Arc::new),
            config: Arc::new(config),
        }
    }

    // ========== Prediction ==========

    /// Ranked suggestions for the text typed so far.
    pub fn predict(&self, input: &str) -> Vec<Suggestion> {
        self.fusion.predict(input)
    }

    /// Record an incoming message; later predictions are re-ranked for it.
    pub fn observe(&self, text: &str) -> Option<ContextAnalysis> {
        self.fusion.observe(text)
    }

    pub fn conversation_flow(&self) -> Option<ConversationFlow> {
        self.fusion.conversation_flow()
    }

    /// Spelling corrections for a single word. Empty when the word is known.
    pub fn check(&self, word: &str) -> Vec<Correction> {
        match self.fusion.spell() {
            Some(spell) => spell.check(word),
            None => Vec::new(),
        }
    }

    // ========== Learning ==========

    /// Learn from a sent message. Saves state when `autosave` is on.
    pub fn learn(&self, text: &str) -> Result<()> {
        self.fusion.learn_from_message(text);
        if self.config.autosave {
            self.save()?;
        }
        Ok(())
    }

    /// Persist learned state. A no-op without a state database.
    pub fn save(&self) -> Result<()> {
        match &self.store {
            Some(store) => self.fusion.save_state(store),
            None => Ok(()),
        }
    }

    // ========== Templates ==========

    pub fn template_categories(&self) -> Vec<CategorySummary> {
        self.fusion
            .templates()
            .map(|t| t.categories())
            .unwrap_or_default()
    }

    pub fn templates(&self, category: &str) -> Vec<Template> {
        self.fusion
            .templates()
            .map(|t| t.by_category(category))
            .unwrap_or_default()
    }

    pub fn template(&self, trigger: &str) -> Option<TemplateMatch> {
        self.fusion.templates()?.get_by_trigger(trigger)
    }

    /// Add a template to the custom category and drop cached results.
    pub fn add_template(&self, trigger: &str, body: &str, description: &str) -> Result<()> {
        if let Some(templates) = self.fusion.templates() {
            templates.add_custom_template(trigger, body, description)?;
            self.fusion.invalidate_cache();
        }
        Ok(())
    }

    /// Body of the template for `trigger` with `{name}` placeholders filled.
    pub fn fill_template(&self, trigger: &str, values: &HashMap<String, String>) -> Option<String> {
        let found = self.template(trigger)?;
        Some(TemplateIndex::fill_variables(&found.template.body, values))
    }

    // ========== Accessors ==========

    pub fn fusion(&self) -> &Arc<PredictionFusion> {
        &self.fusion
    }

    /// A scheduler over this engine's fusion, using the configured queue and
    /// cache settings.
    pub fn scheduler(&self) -> RequestScheduler {
        RequestScheduler::new(Arc::clone(&self.fusion), self.config.base().scheduler.clone())
    }

    pub fn store(&self) -> Option<&StateStore> {
        self.store.as_deref()
    }

    pub fn config(&self) -> &TurkceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_engine_has_every_source() {
        let engine = Engine::bundled();
        let toggles = engine.fusion().toggles();
        for kind in libsuggest_core::SourceKind::ALL {
            assert!(toggles.is_enabled(kind), "{kind}");
        }
    }

    #[test]
    fn fill_template_substitutes_placeholders() {
        let engine = Engine::bundled();
        engine
            .add_template("/kargo-no", "Takip numaranız: {numara}", "Takip")
            .expect("add template");
        let values = HashMap::from([("numara".to_string(), "TR123".to_string())]);
        assert_eq!(
            engine.fill_template("/kargo-no", &values).as_deref(),
            Some("Takip numaranız: TR123")
        );
        assert!(engine.fill_template("/yok-boyle", &values).is_none());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = TurkceConfig {
            state_path: Some(dir.path().join("state").join("turkce.redb")),
            ..TurkceConfig::default()
        };

        {
            let engine = Engine::new(cfg.clone()).expect("engine");
            engine.learn("kargonuz bugün teslim edilecek").expect("learn");
            engine.save().expect("save");
        }

        let engine = Engine::new(cfg).expect("reopen");
        let history = engine.fusion().history().expect("history");
        assert!(history.entry("teslim").is_some());
    }
}
