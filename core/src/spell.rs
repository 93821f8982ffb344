//! Edit-distance spelling correction over a word set.
//!
//! `check` proposes in-vocabulary corrections for an out-of-vocabulary token.
//! Candidates come from three generators, merged by text (lowest score wins):
//! - a dictionary scan bounded by `min(max_distance, len / 2)` edits
//! - locale confusion substitutions (one position at a time, plus the whole
//!   word folded to its skeleton) looked up directly in the vocabulary
//! - a prefix-anchored scan for short-edit completions
//!
//! Scores are "lower is better"; confidence is a step function of the score.
use crate::fuzzy::ConfusionMap;
use crate::lexicon::{shared_chars, Lexicon};
use crate::utils::{char_len, Tokenizer};
use crate::Result;
use ahash::AHashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpellConfig {
    /// Upper bound on edit distance for any generator
    pub max_distance: usize,
    pub max_suggestions: usize,
    /// Tokens shorter than this are taken as prefixes and never corrected
    pub min_correction_length: usize,
    /// Minimum length for words added to the vocabulary
    pub min_word_length: usize,
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    /// Tokens without any of these chars are treated as consonant shorthand
    /// (`slm`, `mntk`) and left alone. Empty disables the check.
    pub vowels: String,
    /// Confusion rules such as `"ş=s"`; language crates populate this
    pub confusions: Vec<String>,
}

impl Default for SpellConfig {
    fn default() -> Self {
        Self {
            max_distance: 3,
            max_suggestions: 5,
            min_correction_length: 4,
            min_word_length: 2,
            cache_ttl_ms: 300_000,
            cache_capacity: 500,
            vowels: "aeiou".to_string(),
            confusions: Vec::new(),
        }
    }
}

/// A proposed correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub word: String,
    pub distance: usize,
    /// Blended score, lower is better
    pub score: f32,
    pub confidence: f32,
}

#[derive(Debug, Default)]
struct Vocabulary {
    words: BTreeSet<String>,
    /// folded skeleton -> words with that skeleton
    skeletons: AHashMap<String, Vec<String>>,
    /// Words added at runtime (persisted separately)
    user_words: BTreeSet<String>,
}

impl Vocabulary {
    fn insert(&mut self, word: String, confusions: &ConfusionMap) -> bool {
        if self.words.contains(&word) {
            return false;
        }
        let skeleton = confusions.fold(&word);
        self.skeletons.entry(skeleton).or_default().push(word.clone());
        self.words.insert(word);
        true
    }
}

struct CachedCorrections {
    inserted_at: Instant,
    items: Vec<Correction>,
}

pub struct SpellCorrector {
    vocabulary: RwLock<Vocabulary>,
    confusions: ConfusionMap,
    config: SpellConfig,
    tokenizer: Tokenizer,
    cache: Mutex<LruCache<String, CachedCorrections>>,
}

impl std::fmt::Debug for SpellCorrector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpellCorrector")
            .field("vocabulary", &self.vocabulary_len())
            .field("config", &self.config)
            .finish()
    }
}

impl SpellCorrector {
    pub fn new<I, S>(words: I, config: SpellConfig, tokenizer: Tokenizer) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let confusions = ConfusionMap::from_rules(&config.confusions);
        let mut vocabulary = Vocabulary::default();
        for w in words {
            let key = tokenizer.key(w.as_ref());
            if char_len(&key) >= config.min_word_length {
                vocabulary.insert(key, &confusions);
            }
        }
        let cap = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            vocabulary: RwLock::new(vocabulary),
            confusions,
            config,
            tokenizer,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Vocabulary = lexicon common + extended words.
    pub fn from_lexicon(lexicon: &Lexicon, config: SpellConfig, tokenizer: Tokenizer) -> Self {
        Self::new(lexicon.vocabulary(), config, tokenizer)
    }

    pub fn config(&self) -> &SpellConfig {
        &self.config
    }

    /// Ranked corrections for `word`; empty when the word is short, known, or
    /// has no plausible correction.
    pub fn check(&self, word: &str) -> Vec<Correction> {
        let word = self.tokenizer.key(word);
        if char_len(&word) < self.config.min_correction_length.max(1) {
            return Vec::new();
        }
        if !self.config.vowels.is_empty() && !word.chars().any(|c| self.config.vowels.contains(c)) {
            return Vec::new();
        }

        if let Some(hit) = self.cached(&word) {
            return hit;
        }

        let Ok(vocab) = self.vocabulary.read() else {
            return Vec::new();
        };
        if vocab.words.contains(&word) {
            return Vec::new();
        }
        let items = self.find_candidates(&vocab, &word);
        drop(vocab);

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                word,
                CachedCorrections {
                    inserted_at: Instant::now(),
                    items: items.clone(),
                },
            );
        }
        items
    }

    fn cached(&self, word: &str) -> Option<Vec<Correction>> {
        let mut cache = self.cache.lock().ok()?;
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);
        // peek keeps insertion order, so eviction stays oldest-first
        let fresh = cache.peek(word).map(|c| c.inserted_at.elapsed() < ttl)?;
        if fresh {
            cache.peek(word).map(|c| c.items.clone())
        } else {
            cache.pop(word);
            None
        }
    }

    fn find_candidates(&self, vocab: &Vocabulary, word: &str) -> Vec<Correction> {
        let chars: Vec<char> = word.chars().collect();
        let len = chars.len();
        let mut best: AHashMap<String, Correction> = AHashMap::new();
        let mut offer = |c: Correction| match best.get(&c.word) {
            Some(existing) if existing.score <= c.score => {}
            _ => {
                best.insert(c.word.clone(), c);
            }
        };

        // (a) bounded dictionary scan
        let max_d = self.config.max_distance.min(len / 2);
        if max_d > 0 {
            for cand in vocab.words.iter() {
                let cand_chars: Vec<char> = cand.chars().collect();
                let d = levenshtein(&chars, &cand_chars, max_d);
                if d > 0 && d <= max_d {
                    offer(Correction {
                        word: cand.clone(),
                        distance: d,
                        score: blended_score(&chars, &cand_chars, d),
                        confidence: 0.0,
                    });
                }
            }
        }

        // (b) locale substitutions
        for (variant, penalty) in self.confusions.single_substitutions(word) {
            if vocab.words.contains(&variant) {
                offer(Correction {
                    word: variant,
                    distance: 1,
                    score: penalty,
                    confidence: 0.0,
                });
            }
        }
        if !self.confusions.is_empty() {
            if let Some(same_skeleton) = vocab.skeletons.get(&self.confusions.fold(word)) {
                for cand in same_skeleton.iter().filter(|c| c.as_str() != word) {
                    let differing = cand.chars().zip(chars.iter()).filter(|(a, b)| a != *b).count();
                    offer(Correction {
                        word: cand.clone(),
                        distance: differing.max(1),
                        score: self.confusions.default_penalty(),
                        confidence: 0.0,
                    });
                }
            }
        }

        // (c) prefix-anchored scan
        let prefix: String = chars.iter().take(len.saturating_sub(2).max(2)).collect();
        for cand in vocab
            .words
            .range(prefix.clone()..)
            .take_while(|w| w.starts_with(&prefix))
        {
            if cand == word {
                continue;
            }
            let cand_chars: Vec<char> = cand.chars().collect();
            let d = levenshtein(&chars, &cand_chars, self.config.max_distance);
            if d > 0 && d <= self.config.max_distance {
                offer(Correction {
                    word: cand.clone(),
                    distance: d,
                    score: d as f32 * 1.2,
                    confidence: 0.0,
                });
            }
        }

        let mut out: Vec<Correction> = best
            .into_values()
            .map(|mut c| {
                c.confidence = confidence_for(c.score);
                c
            })
            .collect();
        out.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.distance.cmp(&b.distance))
                .then_with(|| a.word.cmp(&b.word))
        });
        out.truncate(self.config.max_suggestions);
        out
    }

    // ========== Vocabulary ==========

    pub fn is_known(&self, word: &str) -> bool {
        let key = self.tokenizer.key(word);
        self.vocabulary
            .read()
            .map(|v| v.words.contains(&key))
            .unwrap_or(false)
    }

    /// Add a user word. Returns true if it was new. Clears the result cache.
    pub fn add_word(&self, word: &str) -> bool {
        self.add_words([word]) > 0
    }

    /// Add user words; returns how many were new.
    pub fn add_words<I, S>(&self, words: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Ok(mut vocab) = self.vocabulary.write() else {
            return 0;
        };
        let mut added = 0;
        for w in words {
            let key = self.tokenizer.key(w.as_ref());
            if char_len(&key) < self.config.min_word_length {
                continue;
            }
            vocab.user_words.insert(key.clone());
            if vocab.insert(key, &self.confusions) {
                added += 1;
            }
        }
        drop(vocab);
        self.clear_cache();
        added
    }

    pub fn user_words(&self) -> Vec<String> {
        self.vocabulary
            .read()
            .map(|v| v.user_words.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// User words as a JSON list.
    pub fn export_user_words(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.user_words())?)
    }

    /// Merge a JSON list produced by `export_user_words`.
    pub fn import_user_words(&self, bytes: &[u8]) -> Result<usize> {
        let words: Vec<String> = serde_json::from_slice(bytes)?;
        Ok(self.add_words(words))
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.read().map(|v| v.words.len()).unwrap_or(0)
    }

    // ========== Cache ==========

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

/// Unit-cost Levenshtein distance over chars.
///
/// Returns `max + 1` as soon as the answer is known to exceed `max`, including
/// when the length difference alone does.
pub fn levenshtein(a: &[char], b: &[char], max: usize) -> usize {
    if a.len().abs_diff(b.len()) > max {
        return max + 1;
    }
    if a.is_empty() || b.is_empty() {
        return a.len().max(b.len());
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        let mut row_min = cur[0];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
            row_min = row_min.min(cur[j + 1]);
        }
        if row_min > max {
            return max + 1;
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Lower is better: distance, plus half the length gap, minus a first-char
/// bonus and half the shared-char ratio. Never negative.
fn blended_score(word: &[char], cand: &[char], distance: usize) -> f32 {
    let mut score = distance as f32;
    score += 0.5 * word.len().abs_diff(cand.len()) as f32;
    if word.first() == cand.first() {
        score -= 0.3;
    }
    let longest = word.len().max(cand.len()).max(1);
    score -= 0.5 * shared_chars(word, cand) as f32 / longest as f32;
    score.max(0.0)
}

fn confidence_for(score: f32) -> f32 {
    if score < 1.0 {
        0.95
    } else if score < 2.0 {
        0.85
    } else if score < 3.0 {
        0.70
    } else {
        0.50
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn turkish() -> SpellCorrector {
        let config = SpellConfig {
            vowels: "aeıioöuüâîû".to_string(),
            confusions: ["ı=i", "ş=s", "ğ=g", "ü=u", "ö=o", "ç=c"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Default::default()
        };
        SpellCorrector::new(
            [
                "teşekkür", "teşekkürler", "merhaba", "mantık", "bilgi", "sipariş", "kargo",
                "müşteri", "yardım", "günaydın",
            ],
            config,
            Tokenizer::new(true),
        )
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein(&chars("kargo"), &chars("kargo"), 3), 0);
        assert_eq!(levenshtein(&chars("krgo"), &chars("kargo"), 3), 1);
        assert_eq!(levenshtein(&chars("teşekkür"), &chars("tesekkur"), 3), 2);
        assert_eq!(levenshtein(&chars("a"), &chars("abcdef"), 2), 3);
        assert_eq!(levenshtein(&chars("abcd"), &chars("wxyz"), 2), 3);
    }

    #[test]
    fn short_and_known_words_are_not_corrected() {
        let sc = turkish();
        assert!(sc.check("mrb").is_empty());
        assert!(sc.check("a").is_empty());
        assert!(sc.check("merhaba").is_empty());
        assert!(sc.check("MERHABA").is_empty());
    }

    #[test]
    fn consonant_skeletons_are_left_alone() {
        let sc = turkish();
        assert!(sc.check("mntk").is_empty());
        assert!(sc.check("yrdm").is_empty());
    }

    #[test]
    fn unaccented_form_finds_accented_word() {
        let sc = turkish();
        let out = sc.check("tesekkur");
        let top = out.first().expect("a correction");
        assert_eq!(top.word, "teşekkür");
        assert!(top.confidence >= 0.85);
    }

    #[test]
    fn single_substitution_is_found() {
        let sc = turkish();
        let out = sc.check("bılgı");
        assert_eq!(out[0].word, "bilgi");
        assert_eq!(out[0].confidence, 0.95);
    }

    #[test]
    fn word_from_several_generators_keeps_best_score() {
        let sc = turkish();

        // scan scores 1.4, folded skeleton 0.5
        let out = sc.check("bılgı");
        let hits: Vec<_> = out.iter().filter(|c| c.word == "bilgi").collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 0.5);

        // substitution scores 0.5, scan scores lower
        let out = sc.check("müsteri");
        let hits: Vec<_> = out.iter().filter(|c| c.word == "müşteri").collect();
        assert_eq!(hits.len(), 1);
        let scanned = blended_score(&chars("müsteri"), &chars("müşteri"), 1);
        assert!(scanned < 0.5);
        assert_eq!(hits[0].score, scanned);
        assert_eq!(hits[0].distance, 1);
    }

    #[test]
    fn edit_distance_candidates_are_ranked() {
        let sc = turkish();
        let out = sc.check("merhbaa");
        assert_eq!(out[0].word, "merhaba");
        assert!(out.windows(2).all(|w| w[0].score <= w[1].score));
        assert!(out.len() <= 5);
    }

    #[test]
    fn prefix_scan_completes_near_words() {
        let sc = turkish();
        let out = sc.check("sipar");
        assert!(out.iter().any(|c| c.word == "sipariş"));
    }

    #[test]
    fn results_are_cached_and_cleared_by_add_word() {
        let sc = turkish();
        let first = sc.check("kargoo");
        assert_eq!(sc.cache_len(), 1);
        assert_eq!(sc.check("kargoo"), first);
        assert!(sc.add_word("kargoo"));
        assert_eq!(sc.cache_len(), 0);
        assert!(sc.check("kargoo").is_empty());
        assert!(!sc.add_word("kargoo"));
        assert!(!sc.add_word("x"));
    }

    #[test]
    fn expired_entries_are_recomputed() {
        let config = SpellConfig {
            cache_ttl_ms: 0,
            ..Default::default()
        };
        let sc = SpellCorrector::new(["kargo"], config, Tokenizer::default());
        let _ = sc.check("kargoo");
        let again = sc.check("kargoo");
        assert_eq!(again[0].word, "kargo");
    }

    #[test]
    fn user_words_round_trip() {
        let sc = turkish();
        sc.add_words(["iade", "fatura"]);
        let bytes = sc.export_user_words().expect("export");
        let other = turkish();
        assert_eq!(other.import_user_words(&bytes).expect("import"), 2);
        assert!(other.is_known("fatura"));
        assert_eq!(other.user_words(), vec!["fatura", "iade"]);
    }

    #[test]
    fn confidence_steps() {
        assert_eq!(confidence_for(0.0), 0.95);
        assert_eq!(confidence_for(1.5), 0.85);
        assert_eq!(confidence_for(2.5), 0.70);
        assert_eq!(confidence_for(3.0), 0.50);
    }
}
