//! Word n-gram frequency model for next-word prediction and completion.
//!
//! Tables:
//! - unigram: word -> count
//! - bigram/trigram/quadgram: context key (1..3 tokens joined by one space)
//!   -> next word -> count
//!
//! Prediction sums `count × order_weight` across every order whose context
//! matches the tail of the typed text; longer contexts weigh more. There is no
//! smoothing beyond that cross-order sum. Counts only grow, except when a
//! table exceeds its cap and the least used contexts are pruned.
use crate::lexicon::Lexicon;
use crate::utils::Tokenizer;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::RwLock;

type FastMap<K, V> = HashMap<K, V, ahash::RandomState>;

/// Per-order weights applied to raw counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NGramWeights {
    pub quadgram: f64,
    pub trigram: f64,
    pub bigram: f64,
    /// Applied to unigram prefix matches when a prefix is being typed
    pub unigram: f64,
}

impl Default for NGramWeights {
    fn default() -> Self {
        Self {
            quadgram: 0.4,
            trigram: 0.3,
            bigram: 0.2,
            unigram: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NGramConfig {
    pub weights: NGramWeights,
    /// Cap on candidates returned by `predict` and `complete_word`
    pub max_predictions: usize,
    /// Cap on entries (context, follower pairs) per order table before pruning
    pub max_contexts: usize,
    /// Cap on followers kept under a single context
    pub max_followers: usize,
    /// Cap on unigram entries before pruning
    pub max_unigrams: usize,
    /// Per-step score decay for `complete_sentence`
    pub sentence_decay: f64,
    /// Extension stops when the best follower scores below this
    pub sentence_min_score: f64,
}

impl Default for NGramConfig {
    fn default() -> Self {
        Self {
            weights: NGramWeights::default(),
            max_predictions: 10,
            max_contexts: 50_000,
            max_followers: 1_000,
            max_unigrams: 100_000,
            sentence_decay: 0.7,
            sentence_min_score: 0.1,
        }
    }
}

/// A predicted word and its weighted score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NGramCandidate {
    pub word: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NGramStats {
    pub unigrams: usize,
    pub bigrams: usize,
    pub trigrams: usize,
    pub quadgrams: usize,
}

impl NGramStats {
    pub fn total(&self) -> usize {
        self.unigrams + self.bigrams + self.trigrams + self.quadgrams
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UnigramEntry {
    count: u64,
    last_seen: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Follower {
    count: u64,
    last_seen: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ContextEntry {
    followers: FastMap<String, Follower>,
    total: u64,
    /// Logical tick of the last update
    last_seen: u64,
}

/// Serializable table set. `tick` is a logical clock so recency survives a
/// round-trip without depending on wall time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NGramTables {
    unigrams: FastMap<String, UnigramEntry>,
    bigrams: FastMap<String, ContextEntry>,
    trigrams: FastMap<String, ContextEntry>,
    quadgrams: FastMap<String, ContextEntry>,
    tick: u64,
}

impl NGramTables {
    /// Table keyed by a context of `n` tokens (1..=3).
    fn by_context_len(&self, n: usize) -> Option<&FastMap<String, ContextEntry>> {
        match n {
            1 => Some(&self.bigrams),
            2 => Some(&self.trigrams),
            3 => Some(&self.quadgrams),
            _ => None,
        }
    }

    fn by_context_len_mut(&mut self, n: usize) -> Option<&mut FastMap<String, ContextEntry>> {
        match n {
            1 => Some(&mut self.bigrams),
            2 => Some(&mut self.trigrams),
            3 => Some(&mut self.quadgrams),
            _ => None,
        }
    }

    fn bump_unigram(&mut self, word: &str, delta: u64) {
        let tick = self.tick;
        let e = self.unigrams.entry(word.to_string()).or_default();
        e.count = e.count.saturating_add(delta);
        e.last_seen = tick;
    }

    fn bump_follower(&mut self, n: usize, context: &str, next: &str, delta: u64) {
        let tick = self.tick;
        if let Some(table) = self.by_context_len_mut(n) {
            let e = table.entry(context.to_string()).or_default();
            let f = e.followers.entry(next.to_string()).or_default();
            f.count = f.count.saturating_add(delta);
            f.last_seen = tick;
            e.total = e.total.saturating_add(delta);
            e.last_seen = tick;
        }
    }

    fn stats(&self) -> NGramStats {
        NGramStats {
            unigrams: self.unigrams.len(),
            bigrams: pairs(&self.bigrams),
            trigrams: pairs(&self.trigrams),
            quadgrams: pairs(&self.quadgrams),
        }
    }
}

/// Number of (context, follower) pairs in an order table.
fn pairs(table: &FastMap<String, ContextEntry>) -> usize {
    table.values().map(|e| e.followers.len()).sum()
}

/// Keep the `keep` followers with the highest count, newest first on ties.
fn trim_followers(entry: &mut ContextEntry, keep: usize) -> usize {
    if entry.followers.len() <= keep {
        return 0;
    }
    let mut ranked: Vec<(u64, u64, String)> = entry
        .followers
        .iter()
        .map(|(w, f)| (f.count, f.last_seen, w.clone()))
        .collect();
    ranked.sort();
    let evict = entry.followers.len() - keep;
    for (count, _, word) in ranked.into_iter().take(evict) {
        entry.followers.remove(&word);
        entry.total = entry.total.saturating_sub(count);
    }
    evict
}

/// Thread-safe n-gram predictor. Reads share the lock; `learn` and pruning
/// take it exclusively, so readers never see a half-updated entry.
#[derive(Debug)]
pub struct NGramPredictor {
    tables: RwLock<NGramTables>,
    config: NGramConfig,
    tokenizer: Tokenizer,
}

impl NGramPredictor {
    pub fn new(config: NGramConfig, tokenizer: Tokenizer) -> Self {
        Self {
            tables: RwLock::new(NGramTables::default()),
            config,
            tokenizer,
        }
    }

    /// Seed tables from reference data.
    ///
    /// Common word at rank `r` gets count `max(100 - r, 1)`; the follower at
    /// position `i` of a seed list gets `max(10 - i, 1)`. Multi-word entries
    /// contribute only their first token as a follower and are skipped as
    /// unigrams.
    pub fn from_lexicon(lexicon: &Lexicon, config: NGramConfig, tokenizer: Tokenizer) -> Self {
        let mut tables = NGramTables::default();

        for (rank, word) in lexicon.common_words().iter().enumerate() {
            let tokens = tokenizer.tokenize(word);
            if tokens.len() == 1 {
                let count = 100u64.saturating_sub(rank as u64).max(1);
                let e = tables.unigrams.entry(tokens[0].clone()).or_default();
                e.count = e.count.max(count);
            }
        }

        for (context, followers) in lexicon
            .bigram_seeds()
            .iter()
            .chain(lexicon.trigram_seeds().iter())
        {
            let n = context.split(' ').count();
            let Some(table) = tables.by_context_len_mut(n) else {
                continue;
            };
            for (i, follower) in followers.iter().enumerate() {
                let Some(next) = tokenizer.tokenize(follower).into_iter().next() else {
                    continue;
                };
                let count = 10u64.saturating_sub(i as u64).max(1);
                let e = table.entry(context.clone()).or_default();
                let f = e.followers.entry(next).or_default();
                if count > f.count {
                    e.total += count - f.count;
                    f.count = count;
                }
            }
        }

        let stats = tables.stats();
        tracing::info!(
            unigrams = stats.unigrams,
            bigrams = stats.bigrams,
            trigrams = stats.trigrams,
            "seeded n-gram tables from lexicon"
        );

        Self {
            tables: RwLock::new(tables),
            config,
            tokenizer,
        }
    }

    pub fn config(&self) -> &NGramConfig {
        &self.config
    }

    /// Learn every 1..4-gram in `text`.
    pub fn learn(&self, text: &str) {
        let tokens = self.tokenizer.tokenize(text);
        if tokens.is_empty() {
            return;
        }
        let Ok(mut tables) = self.tables.write() else {
            tracing::warn!("n-gram tables poisoned; dropping learn");
            return;
        };
        tables.tick += 1;
        for token in tokens.iter() {
            tables.bump_unigram(token, 1);
        }
        for n in 1..=3usize {
            for window in tokens.windows(n + 1) {
                let context = window[..n].join(" ");
                tables.bump_follower(n, &context, &window[n], 1);
            }
        }
        self.prune_locked(&mut tables);
    }

    /// Ranked next-word candidates for the text before the cursor.
    ///
    /// `prefix` (the partially typed word, may be empty) filters candidates
    /// case-insensitively and, when non-empty, also admits unigram matches.
    pub fn predict(&self, context: &str, prefix: &str) -> Vec<NGramCandidate> {
        let tokens = self.tokenizer.tokenize(context);
        let prefix = self.tokenizer.key(prefix);
        let Ok(tables) = self.tables.read() else {
            return Vec::new();
        };
        self.predict_tokens(&tables, &tokens, &prefix)
    }

    fn predict_tokens(&self, tables: &NGramTables, tokens: &[String], prefix: &str) -> Vec<NGramCandidate> {
        if tokens.is_empty() && prefix.is_empty() {
            return Vec::new();
        }
        let w = &self.config.weights;
        let mut scores: FastMap<String, f64> = FastMap::default();

        for n in (1..=3usize).rev() {
            if tokens.len() < n {
                continue;
            }
            let weight = match n {
                3 => w.quadgram,
                2 => w.trigram,
                _ => w.bigram,
            };
            let key = tokens[tokens.len() - n..].join(" ");
            let Some(entry) = tables.by_context_len(n).and_then(|t| t.get(&key)) else {
                continue;
            };
            for (word, f) in entry.followers.iter() {
                if prefix.is_empty() || word.starts_with(prefix) {
                    *scores.entry(word.clone()).or_insert(0.0) += f.count as f64 * weight;
                }
            }
        }

        if !prefix.is_empty() {
            for (word, e) in tables.unigrams.iter() {
                if word != prefix && word.starts_with(prefix) {
                    *scores.entry(word.clone()).or_insert(0.0) += e.count as f64 * w.unigram;
                }
            }
        }

        rank(scores, self.config.max_predictions)
    }

    /// Unigram words starting with `prefix`, ranked by raw frequency.
    pub fn complete_word(&self, prefix: &str) -> Vec<NGramCandidate> {
        let prefix = self.tokenizer.key(prefix);
        if prefix.is_empty() {
            return Vec::new();
        }
        let Ok(tables) = self.tables.read() else {
            return Vec::new();
        };
        let scores: FastMap<String, f64> = tables
            .unigrams
            .iter()
            .filter(|(word, _)| *word != &prefix && word.starts_with(&prefix))
            .map(|(word, e)| (word.clone(), e.count as f64))
            .collect();
        rank(scores, self.config.max_predictions)
    }

    /// Greedily extend the top next-word predictions into short phrases.
    ///
    /// Step `i` adds `score × decay^i`; extension stops when there is no
    /// follower or the best follower scores below `sentence_min_score`.
    pub fn complete_sentence(&self, context: &str, max_words: usize) -> Vec<NGramCandidate> {
        const BEAM: usize = 5;
        let tokens = self.tokenizer.tokenize(context);
        if tokens.is_empty() || max_words == 0 {
            return Vec::new();
        }
        let Ok(tables) = self.tables.read() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for start in self.predict_tokens(&tables, &tokens, "").into_iter().take(BEAM) {
            let mut ctx = tokens.clone();
            ctx.push(start.word.clone());
            let mut words = vec![start.word];
            let mut score = start.score;

            for i in 1..max_words {
                let Some(next) = self.predict_tokens(&tables, &ctx, "").into_iter().next() else {
                    break;
                };
                if next.score < self.config.sentence_min_score {
                    break;
                }
                score += next.score * self.config.sentence_decay.powi(i as i32);
                ctx.push(next.word.clone());
                words.push(next.word);
            }

            out.push(NGramCandidate {
                word: words.join(" "),
                score,
            });
        }
        sort_candidates(&mut out);
        out
    }

    /// Raw count of `next` after `context` (or the unigram count when the
    /// context is empty).
    pub fn count(&self, context: &str, next: &str) -> u64 {
        let tokens = self.tokenizer.tokenize(context);
        let next = self.tokenizer.key(next);
        let Ok(tables) = self.tables.read() else {
            return 0;
        };
        if tokens.is_empty() {
            return tables.unigrams.get(&next).map(|e| e.count).unwrap_or(0);
        }
        tables
            .by_context_len(tokens.len())
            .and_then(|t| t.get(&tokens.join(" ")))
            .and_then(|e| e.followers.get(&next).map(|f| f.count))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> NGramStats {
        self.tables.read().map(|t| t.stats()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut tables) = self.tables.write() {
            *tables = NGramTables::default();
        }
    }

    /// Prune every table above its cap down to 90% of the cap.
    ///
    /// Followers under one context are capped at `max_followers` (and never
    /// more than `max_contexts`), dropping the least frequent first and the
    /// oldest on ties. Tables whose pair count still exceeds `max_contexts`
    /// then lose whole contexts, least frequent and least recent first.
    pub fn prune(&self) {
        if let Ok(mut tables) = self.tables.write() {
            self.prune_locked(&mut tables);
        }
    }

    fn prune_locked(&self, tables: &mut NGramTables) {
        let cap = self.config.max_contexts.max(1);
        let follower_cap = self.config.max_followers.max(1).min(cap);
        for n in 1..=3usize {
            let Some(table) = tables.by_context_len_mut(n) else {
                continue;
            };

            let mut trimmed = 0;
            for entry in table.values_mut() {
                if entry.followers.len() > follower_cap {
                    trimmed += trim_followers(entry, (follower_cap * 9 / 10).max(1));
                }
            }
            if trimmed > 0 {
                tracing::debug!(order = n + 1, evicted = trimmed, "trimmed n-gram followers");
            }

            let mut size = pairs(table);
            if size > cap {
                let target = cap * 9 / 10;
                let mut keys: Vec<(u64, u64, String)> = table
                    .iter()
                    .map(|(k, e)| (e.total, e.last_seen, k.clone()))
                    .collect();
                keys.sort();
                let mut evicted = 0;
                for (_, _, key) in keys {
                    if size <= target {
                        break;
                    }
                    if let Some(e) = table.remove(&key) {
                        size -= e.followers.len();
                        evicted += 1;
                    }
                }
                tracing::debug!(order = n + 1, evicted, "pruned n-gram table");
            }
        }

        let cap = self.config.max_unigrams.max(1);
        if tables.unigrams.len() > cap {
            let target = cap * 9 / 10;
            let mut keys: Vec<(u64, u64, String)> = tables
                .unigrams
                .iter()
                .map(|(k, e)| (e.count, e.last_seen, k.clone()))
                .collect();
            keys.sort();
            let evict = tables.unigrams.len() - target;
            for (_, _, key) in keys.into_iter().take(evict) {
                tables.unigrams.remove(&key);
            }
            tracing::debug!(evicted = evict, "pruned unigram table");
        }
    }

    // ========== Persistence ==========

    /// Serialize all tables with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let tables = self.tables.read().map_err(|_| Error::Poisoned("ngram"))?;
        bincode::serialize(&*tables).map_err(|source| Error::Encode {
            key: "ngram".to_string(),
            source,
        })
    }

    /// Replace all tables with a bincode blob produced by `to_bytes`.
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<()> {
        let decoded: NGramTables = bincode::deserialize(bytes).map_err(|source| Error::Decode {
            key: "ngram".to_string(),
            source,
        })?;
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned("ngram"))?;
        *tables = decoded;
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8], config: NGramConfig, tokenizer: Tokenizer) -> Result<Self> {
        let predictor = Self::new(config, tokenizer);
        predictor.load_bytes(bytes)?;
        Ok(predictor)
    }

    /// Save the tables to the given path using bincode.
    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let tables = self.tables.read().map_err(|_| Error::Poisoned("ngram"))?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &*tables).map_err(|source| Error::Encode {
            key: "ngram".to_string(),
            source,
        })?;
        Ok(())
    }

    /// Load tables from a bincode file written by `save_bincode`.
    pub fn load_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let reader = BufReader::new(File::open(path)?);
        let decoded: NGramTables = bincode::deserialize_from(reader).map_err(|source| Error::Decode {
            key: "ngram".to_string(),
            source,
        })?;
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned("ngram"))?;
        *tables = decoded;
        Ok(())
    }
}

fn sort_candidates(v: &mut [NGramCandidate]) {
    v.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.word.cmp(&b.word))
    });
}

fn rank(scores: FastMap<String, f64>, limit: usize) -> Vec<NGramCandidate> {
    let mut out: Vec<NGramCandidate> = scores
        .into_iter()
        .map(|(word, score)| NGramCandidate { word, score })
        .collect();
    sort_candidates(&mut out);
    out.truncate(limit);
    out
}
