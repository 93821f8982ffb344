// core/src/engine.rs
//
// Prediction fusion: runs every enabled source for an input, puts their
// candidates on one scoring scale, merges, re-ranks by conversation context
// and caches the result.

use crate::candidate::{sort_by_score, ReplacementMode, SourceKind, Suggestion};
use crate::context::{ContextAnalysis, ContextClassifier, ConversationFlow, ConversationTracker};
use crate::history::{EntryKind, HistoryStore};
use crate::lexicon::Lexicon;
use crate::ngram::NGramPredictor;
use crate::spell::SpellCorrector;
use crate::store::{keys, StateStore};
use crate::templates::{TemplateIndex, TemplateMatch};
use crate::utils::{char_len, split_last_token, Tokenizer};
use crate::{Config, Result};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Base weight per source on the shared scoring scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceWeights {
    pub template: f32,
    pub history: f32,
    pub ngram: f32,
    /// Dictionary completion, fuzzy matches, n-gram word completion and the
    /// corrections table
    pub dictionary: f32,
    pub spellcheck: f32,
    pub context: f32,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            template: 10.0,
            history: 8.0,
            ngram: 6.0,
            dictionary: 5.0,
            spellcheck: 9.0,
            context: 2.0,
        }
    }
}

impl SourceWeights {
    pub fn get(&self, source: SourceKind) -> f32 {
        match source {
            SourceKind::Template => self.template,
            SourceKind::History => self.history,
            SourceKind::NGram => self.ngram,
            SourceKind::Dictionary | SourceKind::Correction => self.dictionary,
            SourceKind::SpellCheck => self.spellcheck,
            SourceKind::Context => self.context,
        }
    }

    pub fn set(&mut self, source: SourceKind, weight: f32) {
        match source {
            SourceKind::Template => self.template = weight,
            SourceKind::History => self.history = weight,
            SourceKind::NGram => self.ngram = weight,
            SourceKind::Dictionary | SourceKind::Correction => self.dictionary = weight,
            SourceKind::SpellCheck => self.spellcheck = weight,
            SourceKind::Context => self.context = weight,
        }
    }
}

/// Which sources take part in fusion.
///
/// `context` covers both context re-ranking and the conversation-driven
/// suggestions offered for empty input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceToggles {
    pub template: bool,
    pub history: bool,
    pub ngram: bool,
    pub dictionary: bool,
    pub spellcheck: bool,
    pub correction: bool,
    pub context: bool,
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            template: true,
            history: true,
            ngram: true,
            dictionary: true,
            spellcheck: true,
            correction: true,
            context: true,
        }
    }
}

impl SourceToggles {
    pub fn is_enabled(&self, source: SourceKind) -> bool {
        match source {
            SourceKind::Template => self.template,
            SourceKind::History => self.history,
            SourceKind::NGram => self.ngram,
            SourceKind::Dictionary => self.dictionary,
            SourceKind::SpellCheck => self.spellcheck,
            SourceKind::Correction => self.correction,
            SourceKind::Context => self.context,
        }
    }

    pub fn set(&mut self, source: SourceKind, enabled: bool) {
        match source {
            SourceKind::Template => self.template = enabled,
            SourceKind::History => self.history = enabled,
            SourceKind::NGram => self.ngram = enabled,
            SourceKind::Dictionary => self.dictionary = enabled,
            SourceKind::SpellCheck => self.spellcheck = enabled,
            SourceKind::Correction => self.correction = enabled,
            SourceKind::Context => self.context = enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5_000,
            capacity: 100,
        }
    }
}

/// Description and icon attached to suggestions of one kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Label {
    pub description: String,
    pub icon: String,
}

impl Label {
    pub fn new(description: &str, icon: &str) -> Self {
        Self {
            description: description.to_string(),
            icon: icon.to_string(),
        }
    }

    fn apply(&self, s: Suggestion) -> Suggestion {
        let s = if self.description.is_empty() {
            s
        } else {
            s.with_description(self.description.clone())
        };
        if self.icon.is_empty() {
            s
        } else {
            s.with_icon(self.icon.clone())
        }
    }
}

/// Display labels per suggestion kind. Language crates translate these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionLabels {
    pub history: Label,
    pub prediction: Label,
    pub completion: Label,
    pub dictionary: Label,
    pub fuzzy: Label,
    pub spellcheck: Label,
    pub correction: Label,
    pub frequent: Label,
    pub context: Label,
    /// Icon for templates whose category has none
    pub template_icon: String,
}

impl Default for SuggestionLabels {
    fn default() -> Self {
        Self {
            history: Label::new("Used before", "fas fa-history"),
            prediction: Label::new("Suggested word", "fas fa-lightbulb"),
            completion: Label::new("Complete word", "fas fa-keyboard"),
            dictionary: Label::new("Dictionary", "fas fa-book"),
            fuzzy: Label::new("Similar word", "fas fa-search"),
            spellcheck: Label::new("Spelling correction", "fas fa-spell-check"),
            correction: Label::new("Correction", "fas fa-spell-check"),
            frequent: Label::new("Frequently used", "fas fa-star"),
            context: Label::new("Suggested reply", "fas fa-comment"),
            template_icon: "fas fa-bolt".to_string(),
        }
    }
}

const MAX_DICTIONARY_RESULTS: usize = 10;
const MAX_FUZZY_RESULTS: usize = 5;
const DEFAULT_PHRASES: usize = 3;
const DEFAULT_TEMPLATES: usize = 2;
const DEFAULT_PHRASE_SCORE: f32 = 5.0;
const DEFAULT_TEMPLATE_SCORE: f32 = 3.0;

struct CacheEntry {
    inserted_at: Instant,
    value: Vec<Suggestion>,
}

/// Capability-checked constructor for `PredictionFusion`.
///
/// Every component is optional. A source that is enabled in the config but
/// whose component was not supplied is disabled with a warning.
pub struct FusionBuilder {
    config: Config,
    lexicon: Option<Arc<Lexicon>>,
    ngram: Option<Arc<NGramPredictor>>,
    spell: Option<Arc<SpellCorrector>>,
    history: Option<Arc<HistoryStore>>,
    templates: Option<Arc<TemplateIndex>>,
    classifier: Option<Arc<ContextClassifier>>,
}

impl FusionBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lexicon: None,
            ngram: None,
            spell: None,
            history: None,
            templates: None,
            classifier: None,
        }
    }

    pub fn lexicon(mut self, lexicon: Arc<Lexicon>) -> Self {
        self.lexicon = Some(lexicon);
        self
    }

    pub fn ngram(mut self, ngram: Arc<NGramPredictor>) -> Self {
        self.ngram = Some(ngram);
        self
    }

    pub fn spell(mut self, spell: Arc<SpellCorrector>) -> Self {
        self.spell = Some(spell);
        self
    }

    pub fn history(mut self, history: Arc<HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn templates(mut self, templates: Arc<TemplateIndex>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn classifier(mut self, classifier: Arc<ContextClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> PredictionFusion {
        let mut toggles = self.config.sources;
        let available = [
            (SourceKind::Template, self.templates.is_some()),
            (SourceKind::History, self.history.is_some()),
            (SourceKind::NGram, self.ngram.is_some()),
            (SourceKind::Dictionary, self.lexicon.is_some()),
            (SourceKind::SpellCheck, self.spell.is_some()),
            (SourceKind::Correction, self.lexicon.is_some()),
            (SourceKind::Context, self.classifier.is_some()),
        ];
        for (kind, present) in available {
            if toggles.is_enabled(kind) && !present {
                tracing::warn!(source = %kind, "source enabled but no component supplied; disabling");
                toggles.set(kind, false);
            }
        }

        let capacity = NonZeroUsize::new(self.config.cache.capacity).unwrap_or(NonZeroUsize::MIN);
        PredictionFusion {
            tokenizer: self.config.tokenizer(),
            toggles,
            lexicon: self.lexicon,
            ngram: self.ngram,
            spell: self.spell,
            history: self.history,
            templates: self.templates,
            classifier: self.classifier,
            tracker: ConversationTracker::default(),
            cache: Mutex::new(lru::LruCache::new(capacity)),
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            config: self.config,
        }
    }
}

/// Orchestrates the prediction sources.
///
/// `predict` is synchronous and `&self`; components sit behind `Arc` and
/// their own locks, so one fusion instance can serve several threads.
pub struct PredictionFusion {
    config: Config,
    tokenizer: Tokenizer,
    toggles: SourceToggles,
    lexicon: Option<Arc<Lexicon>>,
    ngram: Option<Arc<NGramPredictor>>,
    spell: Option<Arc<SpellCorrector>>,
    history: Option<Arc<HistoryStore>>,
    templates: Option<Arc<TemplateIndex>>,
    classifier: Option<Arc<ContextClassifier>>,
    tracker: ConversationTracker,
    cache: Mutex<lru::LruCache<String, CacheEntry>>,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    generation: AtomicU64,
}

impl std::fmt::Debug for PredictionFusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionFusion")
            .field("toggles", &self.toggles)
            .field("cache_size", &self.cache_size())
            .finish()
    }
}

impl PredictionFusion {
    pub fn builder(config: Config) -> FusionBuilder {
        FusionBuilder::new(config)
    }

    /// Ranked suggestions for the text typed so far.
    ///
    /// Pipeline:
    /// 1. Empty input: default suggestions (not cached)
    /// 2. Cache lookup by normalized input
    /// 3. Command input: template command search only
    /// 4. Otherwise history, n-gram, dictionary, spellcheck and corrections
    /// 5. Deduplicate (first occurrence wins), re-rank by context or sort
    /// 6. Truncate to `max_suggestions` and cache
    pub fn predict(&self, input: &str) -> Vec<Suggestion> {
        if input.trim().is_empty() {
            return self.default_suggestions();
        }

        let key = self.cache_key(input);
        if let Some(hit) = self.cached(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let generation = self.cache_generation();
        let out = self.compute(input);
        self.store_if_current(key, out.clone(), generation);
        out
    }

    /// Bumped whenever learned state changes or the cache is dropped.
    pub fn cache_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cache `value` unless the generation moved past `generation` while it
    /// was computed.
    fn store_if_current(&self, key: String, value: Vec<Suggestion>, generation: u64) -> bool {
        let Ok(mut cache) = self.cache.lock() else {
            return false;
        };
        if self.cache_generation() != generation {
            return false;
        }
        cache.put(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                value,
            },
        );
        true
    }

    fn compute(&self, input: &str) -> Vec<Suggestion> {
        let (context, last) = split_last_token(input);
        let mut candidates: Vec<Suggestion> = Vec::new();

        if self.config.is_command(input) {
            candidates.extend(self.run(SourceKind::Template, || self.template_commands(input.trim())));
        } else {
            candidates.extend(self.run(SourceKind::History, || self.history_source(last)));
            candidates.extend(self.run(SourceKind::NGram, || Ok(self.ngram_source(context, last))));
            candidates.extend(self.run(SourceKind::Dictionary, || Ok(self.dictionary_source(last))));
            if char_len(last) > 3 {
                candidates.extend(self.run(SourceKind::SpellCheck, || Ok(self.spell_source(last))));
            }
            candidates.extend(self.run(SourceKind::Correction, || Ok(self.correction_source(last))));
        }

        let mut merged = dedup(&self.tokenizer, candidates);
        match self.analyze_context(context) {
            Some((classifier, analysis)) => {
                merged = classifier.prioritize_suggestions(merged, &analysis);
            }
            None => sort_by_score(&mut merged),
        }
        merged.truncate(self.config.max_suggestions);
        tracing::debug!(input, results = merged.len(), "fused suggestions");
        merged
    }

    /// Run one source, isolating failures and panics.
    fn run<F>(&self, kind: SourceKind, source: F) -> Vec<Suggestion>
    where
        F: FnOnce() -> Result<Vec<Suggestion>>,
    {
        if !self.toggles.is_enabled(kind) {
            return Vec::new();
        }
        match std::panic::catch_unwind(AssertUnwindSafe(source)) {
            Ok(Ok(found)) => found,
            Ok(Err(err)) => {
                tracing::warn!(source = %kind, error = %err, "source failed; skipping");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(source = %kind, "source panicked; skipping");
                Vec::new()
            }
        }
    }

    fn analyze_context(&self, context: &str) -> Option<(&ContextClassifier, ContextAnalysis)> {
        if context.is_empty() || !self.toggles.context {
            return None;
        }
        let classifier = self.classifier.as_deref()?;
        Some((classifier, classifier.analyze(context)))
    }

    // ========== Sources ==========

    fn template_suggestion(&self, m: TemplateMatch, score: f32) -> Suggestion {
        let icon = if m.icon.is_empty() {
            self.config.labels.template_icon.clone()
        } else {
            m.icon
        };
        let mut s = Suggestion::new(m.template.body, SourceKind::Template, score)
            .with_replacement(ReplacementMode::ReplaceEntireInput)
            .with_icon(icon)
            .with_meta("trigger", m.template.trigger)
            .with_meta("category", m.category_name);
        if !m.template.description.is_empty() {
            s = s.with_description(m.template.description);
        }
        s
    }

    fn template_commands(&self, command: &str) -> Result<Vec<Suggestion>> {
        let Some(templates) = self.templates.as_deref() else {
            return Ok(Vec::new());
        };
        let w = self.config.weights.template;
        Ok(templates
            .try_search_commands(command)?
            .into_iter()
            .map(|m| {
                let score = w + m.score;
                self.template_suggestion(m, score)
            })
            .collect())
    }

    fn history_source(&self, last: &str) -> Result<Vec<Suggestion>> {
        let Some(history) = self.history.as_deref() else {
            return Ok(Vec::new());
        };
        let w = self.config.weights.history;
        Ok(history
            .try_search_by_prefix(last)?
            .into_iter()
            .map(|m| {
                let replacement = match m.entry.kind {
                    EntryKind::Phrase => ReplacementMode::ReplaceEntireInput,
                    _ => ReplacementMode::ReplaceLastToken,
                };
                let s = Suggestion::new(m.entry.text, SourceKind::History, w * (m.score as f32) / 10.0)
                    .with_replacement(replacement)
                    .with_meta("frequency", m.entry.count.to_string());
                self.config.labels.history.apply(s)
            })
            .collect())
    }

    fn ngram_source(&self, context: &str, last: &str) -> Vec<Suggestion> {
        let Some(ngram) = self.ngram.as_deref() else {
            return Vec::new();
        };
        let labels = &self.config.labels;
        let mut out = Vec::new();

        if !context.is_empty() {
            let replacement = if last.is_empty() {
                ReplacementMode::InsertAfterCursor
            } else {
                ReplacementMode::ReplaceLastToken
            };
            let w = self.config.weights.ngram;
            for c in ngram.predict(context, last) {
                let s = Suggestion::new(c.word, SourceKind::NGram, w * (c.score as f32) / 10.0)
                    .with_replacement(replacement);
                out.push(labels.prediction.apply(s));
            }
        }

        if !last.is_empty() {
            let w = self.config.weights.dictionary;
            for c in ngram.complete_word(last) {
                let s = Suggestion::new(c.word, SourceKind::NGram, w * (c.score as f32) / 10.0);
                out.push(labels.completion.apply(s));
            }
        }
        out
    }

    fn dictionary_source(&self, last: &str) -> Vec<Suggestion> {
        let Some(lexicon) = self.lexicon.as_deref() else {
            return Vec::new();
        };
        let prefix = self.tokenizer.key(last);
        if prefix.is_empty() || lexicon.is_empty() {
            return Vec::new();
        }
        let w = self.config.weights.dictionary;
        let n = lexicon.len().max(1) as f32;
        let priority = |word: &str| {
            let rank = lexicon.rank(word).unwrap_or(lexicon.len()) as f32;
            (1.0 - rank / n).max(0.0)
        };
        let labels = &self.config.labels;

        let mut out: Vec<Suggestion> = lexicon
            .complete(&prefix, MAX_DICTIONARY_RESULTS)
            .into_iter()
            .map(|word| {
                let score = w * priority(&word);
                labels.dictionary.apply(Suggestion::new(word, SourceKind::Dictionary, score))
            })
            .collect();

        let prefix_len = char_len(&prefix);
        if prefix_len <= 3 {
            for word in lexicon.containing(&prefix, MAX_DICTIONARY_RESULTS) {
                let score = w * 0.3 * priority(&word);
                out.push(labels.dictionary.apply(Suggestion::new(word, SourceKind::Dictionary, score)));
            }
        }
        sort_by_score(&mut out);
        out.truncate(MAX_DICTIONARY_RESULTS);

        if (4..=5).contains(&prefix_len) {
            let max_distance = 2.min(prefix_len / 2);
            let mut fuzzy: Vec<Suggestion> = lexicon
                .fuzzy(&prefix, max_distance, lexicon.len())
                .into_iter()
                .filter(|(word, _)| !word.starts_with(&prefix))
                .map(|(word, similarity)| {
                    let score = w * similarity * priority(&word) * 0.5;
                    labels.fuzzy.apply(Suggestion::new(word, SourceKind::Dictionary, score))
                })
                .collect();
            sort_by_score(&mut fuzzy);
            fuzzy.truncate(MAX_FUZZY_RESULTS);
            out.extend(fuzzy);
        }
        out
    }

    fn spell_source(&self, last: &str) -> Vec<Suggestion> {
        let Some(spell) = self.spell.as_deref() else {
            return Vec::new();
        };
        let w = self.config.weights.spellcheck;
        spell
            .check(last)
            .into_iter()
            .map(|c| {
                let score = w * (1.0 - c.distance as f32 / 5.0) * c.confidence;
                let s = Suggestion::new(c.word, SourceKind::SpellCheck, score)
                    .with_meta("original", last)
                    .with_meta("confidence", format!("{:.0}", c.confidence * 100.0));
                self.config.labels.spellcheck.apply(s)
            })
            .collect()
    }

    fn correction_source(&self, last: &str) -> Vec<Suggestion> {
        let Some(lexicon) = self.lexicon.as_deref() else {
            return Vec::new();
        };
        let key = self.tokenizer.key(last);
        let Some(fixed) = lexicon.correction(&key) else {
            return Vec::new();
        };
        let score = self.config.weights.dictionary + 5.0;
        let label = &self.config.labels.correction;
        let s = Suggestion::new(fixed, SourceKind::Correction, score)
            .with_description(format!("{}: {} → {}", label.description, last, fixed))
            .with_meta("original", last);
        if label.icon.is_empty() {
            vec![s]
        } else {
            vec![s.with_icon(label.icon.clone())]
        }
    }

    /// Suggestions for an empty input: conversation-driven replies, frequent
    /// phrases and the first templates of the first category.
    pub fn default_suggestions(&self) -> Vec<Suggestion> {
        let mut out = self.run(SourceKind::Context, || Ok(self.context_source()));

        if self.toggles.history {
            if let Some(history) = self.history.as_deref() {
                for m in history.frequent_phrases(DEFAULT_PHRASES) {
                    let s = Suggestion::new(m.entry.text, SourceKind::History, DEFAULT_PHRASE_SCORE)
                        .with_replacement(ReplacementMode::ReplaceEntireInput);
                    out.push(self.config.labels.frequent.apply(s));
                }
            }
        }
        if self.toggles.template {
            if let Some(templates) = self.templates.as_deref() {
                for m in templates.leading(DEFAULT_TEMPLATES) {
                    out.push(self.template_suggestion(m, DEFAULT_TEMPLATE_SCORE));
                }
            }
        }

        let mut out = dedup(&self.tokenizer, out);
        sort_by_score(&mut out);
        out.truncate(self.config.max_suggestions);
        out
    }

    /// Replies fitting the last observed incoming message.
    fn context_source(&self) -> Vec<Suggestion> {
        let (Some(classifier), Some(last)) = (self.classifier.as_deref(), self.tracker.last()) else {
            return Vec::new();
        };
        let analysis = last.analysis;
        let w = self.config.weights.context;
        let label = &self.config.labels.context;
        let mut out = Vec::new();

        for (i, reply) in classifier.suggested_responses(analysis.intent).into_iter().enumerate() {
            let s = Suggestion::new(reply, SourceKind::Context, w + 1.0 - 0.1 * i as f32)
                .with_replacement(ReplacementMode::ReplaceEntireInput)
                .with_meta("intent", analysis.intent.as_str());
            out.push(label.apply(s));
        }
        if self.toggles.history {
            if let Some(history) = self.history.as_deref() {
                let markers = classifier.markers(analysis.intent);
                for m in history.suggest_by_context(&analysis, markers) {
                    let score = w * (1.0 + (m.score as f32 / 10.0).min(1.0));
                    let s = Suggestion::new(m.entry.text, SourceKind::Context, score)
                        .with_replacement(ReplacementMode::ReplaceEntireInput);
                    out.push(label.apply(s));
                }
            }
        }
        if self.toggles.template {
            if let Some(templates) = self.templates.as_deref() {
                for m in templates.suggest_by_context(&analysis) {
                    let score = w + m.score / 2.0;
                    let mut s = self.template_suggestion(m, score);
                    s.source = SourceKind::Context;
                    out.push(s);
                }
            }
        }
        out
    }

    // ========== Learning & conversation ==========

    /// Feed an accepted outgoing message to the learners and drop cached
    /// results.
    pub fn learn_from_message(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Some(ngram) = self.ngram.as_deref() {
            ngram.learn(text);
        }
        if let Some(history) = self.history.as_deref() {
            history.add_message(text);
        }
        self.invalidate_cache();
        tracing::debug!("learned message");
    }

    /// Record an incoming message for context-driven suggestions.
    pub fn observe(&self, text: &str) -> Option<ContextAnalysis> {
        let classifier = self.classifier.as_deref()?;
        let analysis = classifier.analyze(text);
        self.tracker.record(text, analysis.clone());
        Some(analysis)
    }

    pub fn conversation_flow(&self) -> Option<ConversationFlow> {
        self.tracker.flow()
    }

    pub fn tracker(&self) -> &ConversationTracker {
        &self.tracker
    }

    // ========== Persistence ==========

    /// Write every learned component to `store`. Each part is written
    /// independently; the first error is returned after all parts were tried.
    pub fn save_state(&self, store: &StateStore) -> Result<()> {
        let mut first_err = None;
        let mut record = |key: &str, res: Result<()>| {
            if let Err(err) = res {
                tracing::warn!(key, error = %err, "failed to save state");
                first_err.get_or_insert(err);
            }
        };
        if let Some(ngram) = self.ngram.as_deref() {
            record(keys::NGRAM, ngram.to_bytes().and_then(|b| store.put(keys::NGRAM, &b)));
        }
        if let Some(history) = self.history.as_deref() {
            record(keys::HISTORY, history.to_bytes().and_then(|b| store.put(keys::HISTORY, &b)));
        }
        if let Some(templates) = self.templates.as_deref() {
            record(
                keys::CUSTOM_TEMPLATES,
                templates
                    .custom_to_json()
                    .and_then(|j| store.put(keys::CUSTOM_TEMPLATES, j.as_bytes())),
            );
        }
        if let Some(spell) = self.spell.as_deref() {
            record(
                keys::VOCABULARY,
                spell
                    .export_user_words()
                    .and_then(|b| store.put(keys::VOCABULARY, &b)),
            );
        }
        match first_err {
            Some(err) => Err(err),
            None => {
                tracing::info!("state saved");
                Ok(())
            }
        }
    }

    /// Load every part present in `store`. Missing parts are skipped and
    /// corrupt ones are logged and left empty. Returns the number of parts
    /// loaded.
    pub fn load_state(&self, store: &StateStore) -> usize {
        let mut loaded = 0;
        let mut load = |key: &str, apply: &dyn Fn(&[u8]) -> Result<()>| match store.get(key) {
            Ok(Some(bytes)) => match apply(&bytes) {
                Ok(()) => loaded += 1,
                Err(err) => tracing::warn!(key, error = %err, "corrupt state; starting empty"),
            },
            Ok(None) => {}
            Err(err) => tracing::warn!(key, error = %err, "failed to read state"),
        };

        if let Some(ngram) = self.ngram.as_deref() {
            load(keys::NGRAM, &|b| ngram.load_bytes(b));
        }
        if let Some(history) = self.history.as_deref() {
            load(keys::HISTORY, &|b| history.load_bytes(b));
        }
        if let Some(templates) = self.templates.as_deref() {
            load(keys::CUSTOM_TEMPLATES, &|b| {
                let json = std::str::from_utf8(b)
                    .map_err(|e| crate::Error::ReferenceData(format!("custom templates: {}", e)))?;
                templates.custom_from_json(json).map(|_| ())
            });
        }
        if let Some(spell) = self.spell.as_deref() {
            load(keys::VOCABULARY, &|b| spell.import_user_words(b).map(|_| ()));
        }
        self.invalidate_cache();
        tracing::info!(parts = loaded, "state loaded");
        loaded
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn toggles(&self) -> SourceToggles {
        self.toggles
    }

    pub fn tokenizer(&self) -> Tokenizer {
        self.tokenizer
    }

    pub fn lexicon(&self) -> Option<&Arc<Lexicon>> {
        self.lexicon.as_ref()
    }

    pub fn ngram(&self) -> Option<&Arc<NGramPredictor>> {
        self.ngram.as_ref()
    }

    pub fn spell(&self) -> Option<&Arc<SpellCorrector>> {
        self.spell.as_ref()
    }

    pub fn history(&self) -> Option<&Arc<HistoryStore>> {
        self.history.as_ref()
    }

    pub fn templates(&self) -> Option<&Arc<TemplateIndex>> {
        self.templates.as_ref()
    }

    pub fn classifier(&self) -> Option<&Arc<ContextClassifier>> {
        self.classifier.as_ref()
    }

    // ========== Cache ==========

    /// NFC + lower-case; trailing whitespace is significant.
    pub fn cache_key(&self, input: &str) -> String {
        self.tokenizer.fold_case(input)
    }

    fn cached(&self, key: &str) -> Option<Vec<Suggestion>> {
        let mut cache = self.cache.lock().ok()?;
        let ttl = Duration::from_millis(self.config.cache.ttl_ms);
        let fresh = cache.peek(key).map(|e| e.inserted_at.elapsed() < ttl)?;
        if fresh {
            cache.peek(key).map(|e| e.value.clone())
        } else {
            cache.pop(key);
            None
        }
    }

    /// Get cache statistics for monitoring.
    ///
    /// Returns (hits, misses) tuple.
    pub fn cache_stats(&self) -> (usize, usize) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    /// Get cache hit rate as a percentage (0.0 to 100.0).
    ///
    /// Returns None if no cache accesses have been made yet.
    pub fn cache_hit_rate(&self) -> Option<f32> {
        let (hits, misses) = self.cache_stats();
        let total = hits + misses;
        if total == 0 {
            None
        } else {
            Some((hits as f32 / total as f32) * 100.0)
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.lock().map(|c| c.cap().get()).unwrap_or(0)
    }

    /// Drop cached results, keeping the hit/miss counters.
    pub fn invalidate_cache(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Drop cached results and reset the counters.
    pub fn clear_cache(&self) {
        self.invalidate_cache();
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }
}

/// Keep the first suggestion per case-insensitive text.
fn dedup(tokenizer: &Tokenizer, candidates: Vec<Suggestion>) -> Vec<Suggestion> {
    let mut seen: AHashSet<String> = AHashSet::new();
    candidates
        .into_iter()
        .filter(|s| !s.text.trim().is_empty() && seen.insert(tokenizer.key(&s.text)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BoostRule, ContextLexicon, Intent};
    use crate::history::HistoryConfig;
    use crate::lexicon::LexiconData;
    use crate::ngram::NGramConfig;
    use crate::spell::SpellConfig;
    use crate::templates::{TemplateConfig, TemplateSet};

    const TEMPLATES: &str = r#"{"categories": [
        {"key": "general", "name": "Genel", "icon": "fas fa-headset", "templates": [
            {"trigger": "/merhaba", "body": "Merhaba, hoş geldiniz.", "description": "Karşılama"},
            {"trigger": "/bekle", "body": "Lütfen bekleyiniz.", "description": "Bekleme"},
            {"trigger": "/kapanış", "body": "İyi günler.", "description": "Kapanış"}
        ]}
    ]}"#;

    fn lexicon(tokenizer: Tokenizer) -> Lexicon {
        let data = LexiconData {
            common_words: ["merhaba", "nasıl", "kargo", "sipariş", "teşekkür", "yardım", "ara"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            corrections: [("mrb".to_string(), "merhaba".to_string())].into_iter().collect(),
            ..Default::default()
        };
        Lexicon::new(data, tokenizer).expect("lexicon")
    }

    fn fusion_with(config: Config) -> PredictionFusion {
        let tokenizer = config.tokenizer();
        let lexicon = Arc::new(lexicon(tokenizer));
        let spell_config = SpellConfig {
            confusions: vec!["ş=s".to_string(), "ü=u".to_string()],
            ..Default::default()
        };
        let mut ctx = ContextLexicon::default();
        ctx.intents.insert(Intent::Complaint, vec!["sorun".to_string()]);
        ctx.boosts.push(BoostRule {
            intent: Intent::Complaint,
            cues: vec!["özür".to_string()],
            bonus: 3.0,
        });
        ctx.responses.insert(Intent::Complaint, vec!["Özür dileriz.".to_string()]);

        PredictionFusion::builder(config)
            .ngram(Arc::new(NGramPredictor::from_lexicon(&lexicon, NGramConfig::default(), tokenizer)))
            .spell(Arc::new(SpellCorrector::from_lexicon(&lexicon, spell_config, tokenizer)))
            .history(Arc::new(HistoryStore::new(HistoryConfig::default(), tokenizer)))
            .templates(Arc::new(TemplateIndex::new(
                TemplateSet::from_json_str(TEMPLATES).expect("templates"),
                TemplateConfig::default(),
                tokenizer,
            )))
            .classifier(Arc::new(ContextClassifier::new(ctx, "/", tokenizer)))
            .lexicon(lexicon)
            .build()
    }

    fn fusion() -> PredictionFusion {
        fusion_with(Config {
            turkic_casing: true,
            ..Default::default()
        })
    }

    fn texts(v: &[Suggestion]) -> Vec<&str> {
        v.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn weights_and_toggles_by_kind() {
        let mut w = SourceWeights::default();
        assert_eq!(w.get(SourceKind::Correction), 5.0);
        w.set(SourceKind::SpellCheck, 1.0);
        assert_eq!(w.spellcheck, 1.0);
        let mut t = SourceToggles::default();
        t.set(SourceKind::Context, false);
        assert!(!t.is_enabled(SourceKind::Context));
    }

    #[test]
    fn missing_components_disable_sources() {
        let f = FusionBuilder::new(Config::default()).build();
        let t = f.toggles();
        assert!(!t.template && !t.history && !t.ngram && !t.dictionary && !t.context);
        assert!(f.predict("merhaba").is_empty());
    }

    #[test]
    fn command_input_only_searches_templates() {
        let f = fusion();
        let out = f.predict("/me");
        assert_eq!(texts(&out), vec!["Merhaba, hoş geldiniz."]);
        assert_eq!(out[0].replacement, ReplacementMode::ReplaceEntireInput);
        assert_eq!(out[0].source, SourceKind::Template);
        assert!((out[0].score - (10.0 + 3.0 / 8.0 * 10.0)).abs() < 1e-4);
    }

    #[test]
    fn dictionary_completion_for_prefix() {
        let f = fusion();
        let out = f.predict("kar");
        assert!(texts(&out).contains(&"kargo"));
        assert!(out.len() <= 7);
        assert!(out.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn corrections_table_and_spellcheck() {
        let f = fusion();
        let out = f.predict("mrb");
        assert_eq!(out[0].text, "merhaba");
        assert_eq!(out[0].source, SourceKind::Correction);
        assert_eq!(out[0].score, 10.0);

        let out = f.predict("tesekkur");
        assert!(out.iter().any(|s| s.text == "teşekkür" && s.source == SourceKind::SpellCheck));
    }

    #[test]
    fn learned_text_is_predicted_next() {
        let f = fusion();
        f.learn_from_message("merhaba nasılsınız");
        let out = f.predict("merhaba ");
        let hit = out.iter().find(|s| s.text == "nasılsınız").expect("learned follower");
        assert_eq!(hit.replacement, ReplacementMode::InsertAfterCursor);
    }

    #[test]
    fn repeated_predict_hits_cache() {
        let f = fusion();
        let a = f.predict("Kargo ");
        let b = f.predict("kargo ");
        assert_eq!(a, b);
        assert_eq!(f.cache_stats(), (1, 1));
        assert_eq!(f.cache_size(), 1);
        f.learn_from_message("kargo yolda");
        assert_eq!(f.cache_size(), 0);
        assert_eq!(f.cache_hit_rate(), Some(50.0));
        f.clear_cache();
        assert_eq!(f.cache_hit_rate(), None);
    }

    #[test]
    fn result_computed_before_learn_is_not_cached() {
        let f = fusion();
        let key = f.cache_key("kargo ");
        let generation = f.cache_generation();
        let stale = f.compute("kargo ");
        f.learn_from_message("kargo yolda");
        assert!(!f.store_if_current(key.clone(), stale, generation));
        assert_eq!(f.cache_size(), 0);

        let after = f.predict("kargo ");
        assert!(after.iter().any(|s| s.text == "yolda"));
        assert_eq!(f.cache_size(), 1);

        let generation = f.cache_generation();
        f.clear_cache();
        assert!(f.cache_generation() > generation);
    }

    #[test]
    fn expired_cache_entries_are_recomputed() {
        let mut config = Config::default();
        config.cache.ttl_ms = 0;
        let f = fusion_with(config);
        f.predict("kar");
        f.predict("kar");
        assert_eq!(f.cache_stats(), (0, 2));
    }

    #[test]
    fn disabled_sources_contribute_nothing() {
        let mut config = Config::default();
        config.set_source_enabled(SourceKind::Correction, false);
        config.set_source_enabled(SourceKind::SpellCheck, false);
        let f = fusion_with(config);
        assert!(f.predict("mrb").iter().all(|s| s.source != SourceKind::Correction));
    }

    #[test]
    fn empty_input_offers_defaults_and_context_replies() {
        let f = fusion();
        f.learn_from_message("Kargonuz yolda.");
        let out = f.predict("   ");
        assert_eq!(out[0].text, "Kargonuz yolda.");
        assert_eq!(out[0].score, 5.0);
        assert!(texts(&out).contains(&"Merhaba, hoş geldiniz."));

        f.observe("bir sorun var");
        let out = f.predict("");
        assert!(out.iter().any(|s| s.source == SourceKind::Context && s.text == "Özür dileriz."));
    }

    #[test]
    fn context_reranks_apologies() {
        let f = fusion();
        f.history().expect("history").add_message("özür dileriz");
        f.history().expect("history").add_message("özet geçiyorum");
        let out = f.predict("sorun var ö");
        assert_eq!(out[0].text, "özür dileriz");
        assert!(out[0].context_boost > 0.0);
    }

    #[test]
    fn state_round_trips_through_store() {
        let f = fusion();
        f.learn_from_message("iade talebiniz alındı");
        f.templates()
            .expect("templates")
            .add_custom_template("/iade", "İade alındı.", "")
            .expect("custom");
        f.spell().expect("spell").add_word("kargocu");
        let store = StateStore::in_memory();
        f.save_state(&store).expect("save");

        let g = fusion();
        assert_eq!(g.load_state(&store), 4);
        assert_eq!(g.ngram().expect("ngram").count("iade", "talebiniz"), 1);
        assert!(g.templates().expect("templates").get_by_trigger("/iade").is_some());
        assert!(g.spell().expect("spell").is_known("kargocu"));
        assert!(g.history().expect("history").entry("iade talebiniz alındı").is_some());
    }

    #[test]
    fn corrupt_state_is_skipped() {
        let store = StateStore::in_memory();
        store.put(keys::NGRAM, &[0xff]).expect("put");
        store.put(keys::CUSTOM_TEMPLATES, b"[]").expect("put");
        let f = fusion();
        assert_eq!(f.load_state(&store), 1);
        assert!(!f.predict("kar").is_empty());
    }
}
