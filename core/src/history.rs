//! Personal phrase and word frequency learner.
//!
//! Every accepted message bumps counters for the whole phrase, each word of
//! two or more chars, and each bigram/trigram. Entries are keyed by their
//! lower-cased text and carry a `last_used` timestamp (unix ms) so queries can
//! favour recent usage.
//!
//! Public API:
//! - `HistoryStore::add_message` - Record an accepted message
//! - `HistoryStore::search_by_prefix` - Recency-weighted prefix lookup
//! - `HistoryStore::frequent_phrases` / `frequent_words`
//! - `HistoryStore::suggest_by_context` - Entries relevant to a classified context
//! - `HistoryStore::export` / `import` - JSON snapshot with count merging
use crate::context::ContextAnalysis;
use crate::utils::{char_len, now_ms, Tokenizer};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

type FastMap<K, V> = HashMap<K, V, ahash::RandomState>;

const HOUR_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Ring size for recent messages
    pub max_history_items: usize,
    /// Ring size for the in-memory session log
    pub max_session_items: usize,
    /// Frequency table is pruned above `× 10` entries down to `× 5`
    pub max_frequent_items: usize,
    /// Entries used within this window get a recency bonus
    pub recent_window_ms: u64,
    pub max_results: usize,
    /// Words shorter than this are not counted on their own
    pub min_word_length: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history_items: 500,
            max_session_items: 1_000,
            max_frequent_items: 50,
            recent_window_ms: HOUR_MS,
            max_results: 10,
            min_word_length: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Word,
    Phrase,
    Bigram,
    Trigram,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Word => "word",
            EntryKind::Phrase => "phrase",
            EntryKind::Bigram => "bigram",
            EntryKind::Trigram => "trigram",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    pub text: String,
    pub kind: EntryKind,
    pub count: u64,
    /// Unix milliseconds
    pub last_used: u64,
}

/// One accepted message in the recent ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub text: String,
    pub timestamp: u64,
}

/// An entry with its query-specific score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMatch {
    pub entry: FrequencyEntry,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_messages: usize,
    pub session_messages: usize,
    pub unique_words: usize,
    pub unique_phrases: usize,
    pub total_entries: usize,
}

/// Portable JSON form used by `export`/`import` and the export tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySnapshot {
    pub messages: Vec<HistoryMessage>,
    pub frequencies: Vec<FrequencyEntry>,
    pub exported_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryState {
    messages: VecDeque<HistoryMessage>,
    frequencies: FastMap<String, FrequencyEntry>,
}

#[derive(Debug)]
pub struct HistoryStore {
    state: RwLock<HistoryState>,
    /// Messages accepted since construction; never persisted
    session: RwLock<VecDeque<HistoryMessage>>,
    config: HistoryConfig,
    tokenizer: Tokenizer,
}

impl HistoryStore {
    pub fn new(config: HistoryConfig, tokenizer: Tokenizer) -> Self {
        Self {
            state: RwLock::new(HistoryState::default()),
            session: RwLock::new(VecDeque::new()),
            config,
            tokenizer,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Record an accepted message now. Blank messages are ignored.
    pub fn add_message(&self, text: &str) {
        self.add_message_at(text, now_ms());
    }

    /// Record an accepted message with an explicit timestamp.
    pub fn add_message_at(&self, text: &str, timestamp: u64) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let message = HistoryMessage {
            text: text.to_string(),
            timestamp,
        };
        if let Ok(mut session) = self.session.write() {
            session.push_back(message.clone());
            while session.len() > self.config.max_session_items.max(1) {
                session.pop_front();
            }
        }
        let Ok(mut state) = self.state.write() else {
            tracing::warn!("history poisoned; dropping message");
            return;
        };

        state.messages.push_back(message);
        while state.messages.len() > self.config.max_history_items {
            state.messages.pop_front();
        }

        self.bump(&mut state, text, EntryKind::Phrase, timestamp);
        let tokens = self.tokenizer.tokenize(text);
        for word in tokens.iter() {
            if char_len(word) >= self.config.min_word_length {
                self.bump(&mut state, word, EntryKind::Word, timestamp);
            }
        }
        for pair in tokens.windows(2) {
            self.bump(&mut state, &pair.join(" "), EntryKind::Bigram, timestamp);
        }
        for triple in tokens.windows(3) {
            self.bump(&mut state, &triple.join(" "), EntryKind::Trigram, timestamp);
        }

        if state.frequencies.len() > self.config.max_frequent_items * 10 {
            prune(&mut state.frequencies, self.config.max_frequent_items * 5, timestamp);
        }
    }

    fn bump(&self, state: &mut HistoryState, text: &str, kind: EntryKind, timestamp: u64) {
        let entry = state
            .frequencies
            .entry(self.tokenizer.key(text))
            .or_insert_with(|| FrequencyEntry {
                text: text.to_string(),
                kind,
                count: 0,
                last_used: 0,
            });
        entry.text = text.to_string();
        entry.kind = kind;
        entry.count += 1;
        entry.last_used = entry.last_used.max(timestamp);
    }

    // ========== Queries ==========

    /// Entries whose key starts with `prefix`, best first. Empty prefix yields
    /// nothing.
    pub fn search_by_prefix(&self, prefix: &str) -> Vec<HistoryMatch> {
        self.try_search_by_prefix(prefix).unwrap_or_default()
    }

    pub fn try_search_by_prefix(&self, prefix: &str) -> Result<Vec<HistoryMatch>> {
        let prefix = self.tokenizer.fold_case(prefix.trim_start());
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().map_err(|_| Error::Poisoned("history"))?;
        let now = now_ms();
        let mut out: Vec<HistoryMatch> = state
            .frequencies
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, entry)| HistoryMatch {
                entry: entry.clone(),
                score: self.prefix_score(key, entry, &prefix, now),
            })
            .collect();
        sort_matches(&mut out);
        out.truncate(self.config.max_results);
        Ok(out)
    }

    fn prefix_score(&self, key: &str, entry: &FrequencyEntry, prefix: &str, now: u64) -> f64 {
        let mut score = entry.count as f64;
        if key == prefix {
            score *= 2.0;
        }
        if key.starts_with(prefix) {
            score *= 1.5;
        }
        if now.saturating_sub(entry.last_used) < self.config.recent_window_ms {
            score *= 1.3;
        }
        if char_len(&entry.text) > 100 {
            score *= 0.7;
        }
        score
    }

    /// Phrase and trigram entries ranked by `count × (1 + 1/(1 + age_hours))`.
    pub fn frequent_phrases(&self, limit: usize) -> Vec<HistoryMatch> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let now = now_ms();
        let mut out: Vec<HistoryMatch> = state
            .frequencies
            .values()
            .filter(|e| matches!(e.kind, EntryKind::Phrase | EntryKind::Trigram))
            .map(|e| {
                let age_hours = now.saturating_sub(e.last_used) as f64 / HOUR_MS as f64;
                HistoryMatch {
                    entry: e.clone(),
                    score: e.count as f64 * (1.0 + 1.0 / (1.0 + age_hours)),
                }
            })
            .collect();
        sort_matches(&mut out);
        out.truncate(limit);
        out
    }

    /// Word entries ranked by count.
    pub fn frequent_words(&self, limit: usize) -> Vec<HistoryMatch> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut out: Vec<HistoryMatch> = state
            .frequencies
            .values()
            .filter(|e| e.kind == EntryKind::Word)
            .map(|e| HistoryMatch {
                entry: e.clone(),
                score: e.count as f64,
            })
            .collect();
        sort_matches(&mut out);
        out.truncate(limit);
        out
    }

    /// Entries that overlap the classified context.
    ///
    /// Relevance is +2 per analysis keyword the entry contains and +3 if it
    /// contains any of `intent_markers`; entries with no relevance are skipped.
    pub fn suggest_by_context<S: AsRef<str>>(
        &self,
        analysis: &ContextAnalysis,
        intent_markers: &[S],
    ) -> Vec<HistoryMatch> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let keywords: Vec<String> = analysis
            .keywords
            .iter()
            .map(|k| self.tokenizer.key(k))
            .filter(|k| !k.is_empty())
            .collect();
        let markers: Vec<String> = intent_markers
            .iter()
            .map(|m| self.tokenizer.key(m.as_ref()))
            .filter(|m| !m.is_empty())
            .collect();

        let mut out = Vec::new();
        for (key, entry) in state.frequencies.iter() {
            let mut relevance = 2 * keywords.iter().filter(|k| key.contains(k.as_str())).count();
            if markers.iter().any(|m| key.contains(m.as_str())) {
                relevance += 3;
            }
            if relevance > 0 {
                out.push(HistoryMatch {
                    entry: entry.clone(),
                    score: entry.count as f64 * relevance as f64,
                });
            }
        }
        sort_matches(&mut out);
        out.truncate(5);
        out
    }

    /// Most recent messages first.
    pub fn recent_messages(&self, limit: usize) -> Vec<HistoryMessage> {
        self.state
            .read()
            .map(|s| s.messages.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Messages accepted during this session, most recent first.
    pub fn session_messages(&self) -> Vec<HistoryMessage> {
        self.session
            .read()
            .map(|s| s.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entry(&self, text: &str) -> Option<FrequencyEntry> {
        let key = self.tokenizer.key(text);
        self.state.read().ok()?.frequencies.get(&key).cloned()
    }

    /// All frequency entries, by descending count then text.
    pub fn entries(&self) -> Vec<FrequencyEntry> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut out: Vec<FrequencyEntry> = state.frequencies.values().cloned().collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.text.cmp(&b.text)));
        out
    }

    pub fn stats(&self) -> HistoryStats {
        let session_messages = self.session.read().map(|s| s.len()).unwrap_or(0);
        let Ok(state) = self.state.read() else {
            return HistoryStats::default();
        };
        let count_kind = |kind: EntryKind| state.frequencies.values().filter(|e| e.kind == kind).count();
        HistoryStats {
            total_messages: state.messages.len(),
            session_messages,
            unique_words: count_kind(EntryKind::Word),
            unique_phrases: count_kind(EntryKind::Phrase),
            total_entries: state.frequencies.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state
            .read()
            .map(|s| s.frequencies.is_empty() && s.messages.is_empty())
            .unwrap_or(true)
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = HistoryState::default();
        }
        if let Ok(mut session) = self.session.write() {
            session.clear();
        }
    }

    // ========== Persistence ==========

    pub fn export(&self) -> HistorySnapshot {
        let messages = self
            .state
            .read()
            .map(|s| s.messages.iter().cloned().collect())
            .unwrap_or_default();
        HistorySnapshot {
            messages,
            frequencies: self.entries(),
            exported_at: now_ms(),
        }
    }

    /// Merge a snapshot: counts are summed, `last_used` keeps the later value,
    /// messages are appended and the ring cap re-applied.
    pub fn import(&self, snapshot: HistorySnapshot) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Poisoned("history"))?;
        for message in snapshot.messages {
            state.messages.push_back(message);
        }
        while state.messages.len() > self.config.max_history_items {
            state.messages.pop_front();
        }
        for incoming in snapshot.frequencies {
            let key = self.tokenizer.key(&incoming.text);
            if key.is_empty() {
                continue;
            }
            match state.frequencies.get_mut(&key) {
                Some(existing) => {
                    existing.count += incoming.count;
                    existing.last_used = existing.last_used.max(incoming.last_used);
                }
                None => {
                    state.frequencies.insert(key, incoming);
                }
            }
        }
        Ok(())
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    pub fn import_json(&self, json: &str) -> Result<()> {
        self.import(serde_json::from_str(json)?)
    }

    /// Serialize the ring and frequency table with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let state = self.state.read().map_err(|_| Error::Poisoned("history"))?;
        bincode::serialize(&*state).map_err(|source| Error::Encode {
            key: "history".to_string(),
            source,
        })
    }

    /// Replace the persisted state with a blob produced by `to_bytes`.
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<()> {
        let decoded: HistoryState = bincode::deserialize(bytes).map_err(|source| Error::Decode {
            key: "history".to_string(),
            source,
        })?;
        let mut state = self.state.write().map_err(|_| Error::Poisoned("history"))?;
        *state = decoded;
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8], config: HistoryConfig, tokenizer: Tokenizer) -> Result<Self> {
        let store = Self::new(config, tokenizer);
        store.load_bytes(bytes)?;
        Ok(store)
    }
}

/// Keep the `keep` entries with the highest `count + last_used/now`.
fn prune(frequencies: &mut FastMap<String, FrequencyEntry>, keep: usize, now: u64) {
    let now = now.max(1) as f64;
    let mut ranked: Vec<(f64, String)> = frequencies
        .iter()
        .map(|(k, e)| (e.count as f64 + e.last_used as f64 / now, k.clone()))
        .collect();
    ranked.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    let before = frequencies.len();
    for (_, key) in ranked.into_iter().skip(keep) {
        frequencies.remove(&key);
    }
    tracing::debug!(before, after = frequencies.len(), "pruned history frequencies");
}

fn sort_matches(v: &mut [HistoryMatch]) {
    v.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entry.text.cmp(&b.entry.text))
    });
}
