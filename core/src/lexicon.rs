//! Static reference lexicon.
//!
//! Holds the language crate's word lists in query-ready form:
//! - common words, ranked by frequency (rank 0 = most frequent) and indexed in
//!   an `fst::Map` for prefix streams
//! - extended vocabulary used only to seed the spell checker
//! - bigram/trigram seed tables for the n-gram predictor
//! - a known-misspelling table
//!
//! The lexicon is immutable after construction and is shared via `Arc`.
//!
//! Public API:
//! - `LexiconData` - serde shape of the JSON reference file
//! - `Lexicon` - ranked prefix/containment/fuzzy lookup and seed accessors

use crate::utils::Tokenizer;
use crate::{Error, Result};
use ahash::AHashMap;
use fst::automaton::{Automaton, Str};
use fst::{IntoStreamer, Map, Streamer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Distance returned by `fuzzy_distance` when strings are too far apart to
/// be worth comparing.
pub const FUZZY_TOO_FAR: usize = 999;

/// Raw lexicon as stored in reference JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconData {
    /// Frequency-ordered common words (most frequent first)
    pub common_words: Vec<String>,
    /// Additional vocabulary (spell checking only)
    pub extended_words: Vec<String>,
    /// word -> followers, most likely first
    pub bigrams: BTreeMap<String, Vec<String>>,
    /// "w1 w2" -> followers, most likely first
    pub trigrams: BTreeMap<String, Vec<String>>,
    /// misspelling -> correct form
    pub corrections: BTreeMap<String, String>,
    pub sentence_starters: Vec<String>,
    pub sentence_enders: Vec<String>,
}

pub struct Lexicon {
    /// Deduplicated, normalized common words in rank order
    ranked: Vec<String>,
    /// word -> rank; `None` when there are no common words
    index: Option<Map<Vec<u8>>>,
    vocabulary: Vec<String>,
    bigrams: Vec<(String, Vec<String>)>,
    trigrams: Vec<(String, Vec<String>)>,
    corrections: AHashMap<String, String>,
    sentence_starters: Vec<String>,
    sentence_enders: Vec<String>,
}

impl std::fmt::Debug for Lexicon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lexicon")
            .field("common_words", &self.ranked.len())
            .field("vocabulary", &self.vocabulary.len())
            .field("bigrams", &self.bigrams.len())
            .field("trigrams", &self.trigrams.len())
            .field("corrections", &self.corrections.len())
            .finish()
    }
}

impl Lexicon {
    /// Build a lexicon from raw data, normalizing every entry with `tokenizer`.
    pub fn new(data: LexiconData, tokenizer: Tokenizer) -> Result<Self> {
        let mut ranked: Vec<String> = Vec::with_capacity(data.common_words.len());
        let mut ranks: BTreeMap<String, u64> = BTreeMap::new();
        for word in data.common_words.iter() {
            let key = tokenizer.key(word);
            if key.is_empty() || ranks.contains_key(&key) {
                continue;
            }
            ranks.insert(key.clone(), ranked.len() as u64);
            ranked.push(key);
        }

        // BTreeMap iteration is already in lexicographic byte order
        let index = if ranks.is_empty() {
            None
        } else {
            Some(Map::from_iter(ranks.iter().map(|(k, v)| (k.as_bytes(), *v)))?)
        };

        let mut seen = ahash::AHashSet::new();
        let mut vocabulary = Vec::with_capacity(ranked.len() + data.extended_words.len());
        for word in ranked.iter().cloned().chain(data.extended_words.iter().map(|w| tokenizer.key(w))) {
            if !word.is_empty() && seen.insert(word.clone()) {
                vocabulary.push(word);
            }
        }

        let seed = |table: &BTreeMap<String, Vec<String>>| -> Vec<(String, Vec<String>)> {
            table
                .iter()
                .map(|(k, followers)| {
                    (
                        tokenizer.tokenize(k).join(" "),
                        followers.iter().map(|f| tokenizer.key(f)).collect(),
                    )
                })
                .filter(|(k, _)| !k.is_empty())
                .collect()
        };
        let bigrams = seed(&data.bigrams);
        let trigrams = seed(&data.trigrams);

        let corrections = data
            .corrections
            .iter()
            .map(|(wrong, right)| (tokenizer.key(wrong), right.trim().to_string()))
            .filter(|(wrong, right)| !wrong.is_empty() && !right.is_empty())
            .collect();

        tracing::debug!(
            common = ranked.len(),
            vocabulary = vocabulary.len(),
            "lexicon built"
        );

        Ok(Self {
            ranked,
            index,
            vocabulary,
            bigrams,
            trigrams,
            corrections,
            sentence_starters: data.sentence_starters,
            sentence_enders: data.sentence_enders,
        })
    }

    /// An empty lexicon; every query returns nothing.
    pub fn empty() -> Self {
        Self {
            ranked: Vec::new(),
            index: None,
            vocabulary: Vec::new(),
            bigrams: Vec::new(),
            trigrams: Vec::new(),
            corrections: AHashMap::new(),
            sentence_starters: Vec::new(),
            sentence_enders: Vec::new(),
        }
    }

    pub fn from_json_str(json: &str, tokenizer: Tokenizer) -> Result<Self> {
        let data: LexiconData = serde_json::from_str(json)
            .map_err(|e| Error::ReferenceData(format!("lexicon: {}", e)))?;
        Self::new(data, tokenizer)
    }

    pub fn load_json<P: AsRef<Path>>(path: P, tokenizer: Tokenizer) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, tokenizer)
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty() && self.vocabulary.is_empty()
    }

    /// Number of distinct common words.
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    /// Rank of a common word (0 = most frequent).
    pub fn rank(&self, word: &str) -> Option<usize> {
        self.index.as_ref()?.get(word).map(|r| r as usize)
    }

    pub fn common_words(&self) -> &[String] {
        &self.ranked
    }

    /// Common words starting with `prefix`, most frequent first.
    ///
    /// The prefix itself is not returned.
    pub fn complete(&self, prefix: &str, limit: usize) -> Vec<String> {
        let Some(index) = self.index.as_ref() else {
            return Vec::new();
        };
        if prefix.is_empty() || limit == 0 {
            return Vec::new();
        }
        let matcher = Str::new(prefix).starts_with();
        let mut stream = index.search(matcher).into_stream();
        let mut hits: Vec<(u64, String)> = Vec::new();
        while let Some((key, rank)) = stream.next() {
            if let Ok(word) = std::str::from_utf8(key) {
                if word != prefix {
                    hits.push((rank, word.to_string()));
                }
            }
        }
        hits.sort_by_key(|(rank, _)| *rank);
        hits.into_iter().take(limit).map(|(_, w)| w).collect()
    }

    /// Common words containing `fragment` somewhere other than at the start.
    pub fn containing(&self, fragment: &str, limit: usize) -> Vec<String> {
        if fragment.is_empty() {
            return Vec::new();
        }
        self.ranked
            .iter()
            .filter(|w| w.contains(fragment) && !w.starts_with(fragment))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Common words within `max_distance` of `input` by `fuzzy_distance`.
    ///
    /// Returns `(word, similarity)` pairs ordered by distance, then rank.
    /// Exact matches are skipped.
    pub fn fuzzy(&self, input: &str, max_distance: usize, limit: usize) -> Vec<(String, f32)> {
        if input.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<(usize, usize, &String)> = self
            .ranked
            .iter()
            .enumerate()
            .filter_map(|(rank, word)| {
                let d = fuzzy_distance(input, word);
                (d > 0 && d <= max_distance).then_some((d, rank, word))
            })
            .collect();
        hits.sort_by_key(|(d, rank, _)| (*d, *rank));
        hits.into_iter()
            .take(limit)
            .map(|(d, _, word)| {
                let longest = input.chars().count().max(word.chars().count()).max(1);
                (word.clone(), 1.0 - d as f32 / longest as f32)
            })
            .collect()
    }

    /// Correct form of a known misspelling.
    pub fn correction(&self, word: &str) -> Option<&str> {
        self.corrections.get(word).map(|s| s.as_str())
    }

    /// Common plus extended words, deduplicated.
    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn bigram_seeds(&self) -> &[(String, Vec<String>)] {
        &self.bigrams
    }

    pub fn trigram_seeds(&self) -> &[(String, Vec<String>)] {
        &self.trigrams
    }

    pub fn sentence_starters(&self) -> &[String] {
        &self.sentence_starters
    }

    pub fn sentence_enders(&self) -> &[String] {
        &self.sentence_enders
    }
}

/// Cheap typo distance used for dictionary fuzzy lookup.
///
/// Short strings (both ≤ 5 chars) count positional mismatches against the
/// longer length; longer strings use the longer length minus the shared char
/// multiset. Length differences above 3 return `FUZZY_TOO_FAR`.
pub fn fuzzy_distance(a: &str, b: &str) -> usize {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    if ac.len().abs_diff(bc.len()) > 3 {
        return FUZZY_TOO_FAR;
    }
    let longest = ac.len().max(bc.len());
    if longest <= 5 {
        let same = ac.iter().zip(bc.iter()).filter(|(x, y)| x == y).count();
        return longest - same;
    }
    longest - shared_chars(&ac, &bc)
}

/// Size of the multiset intersection of two char sequences.
pub(crate) fn shared_chars(a: &[char], b: &[char]) -> usize {
    let mut counts: AHashMap<char, usize> = AHashMap::new();
    for c in a {
        *counts.entry(*c).or_insert(0) += 1;
    }
    let mut shared = 0;
    for c in b {
        if let Some(n) = counts.get_mut(c) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    shared
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Lexicon {
        let data = LexiconData {
            common_words: vec![
                "bir".into(),
                "Merhaba".into(),
                "mantık".into(),
                "mantıklı".into(),
                "müşteri".into(),
                "merhaba".into(),
                "sipariş".into(),
                "teşekkür".into(),
            ],
            extended_words: vec!["kargo".into(), "sipariş".into()],
            bigrams: BTreeMap::from([(
                "merhaba".to_string(),
                vec!["size".to_string(), "nasıl".to_string()],
            )]),
            trigrams: BTreeMap::new(),
            corrections: BTreeMap::from([("Mrb".to_string(), "merhaba".to_string())]),
            sentence_starters: vec![],
            sentence_enders: vec![],
        };
        Lexicon::new(data, Tokenizer::new(true)).expect("lexicon")
    }

    #[test]
    fn dedupes_and_keeps_first_rank() {
        let lex = sample();
        assert_eq!(lex.len(), 7);
        assert_eq!(lex.rank("merhaba"), Some(1));
        assert_eq!(lex.rank("bir"), Some(0));
    }

    #[test]
    fn prefix_completion_is_rank_ordered() {
        let lex = sample();
        assert_eq!(lex.complete("m", 10), vec!["merhaba", "mantık", "mantıklı", "müşteri"]);
        assert_eq!(lex.complete("mantık", 10), vec!["mantıklı"]);
        assert_eq!(lex.complete("m", 2).len(), 2);
        assert!(lex.complete("", 10).is_empty());
    }

    #[test]
    fn containment_excludes_prefix_matches() {
        let lex = sample();
        assert_eq!(lex.containing("ş", 10), vec!["müşteri", "sipariş", "teşekkür"]);
        assert!(lex.containing("me", 10).is_empty());
    }

    #[test]
    fn fuzzy_finds_near_words() {
        let lex = sample();
        let hits = lex.fuzzy("mantik", 2, 5);
        assert_eq!(hits.first().map(|(w, _)| w.as_str()), Some("mantık"));
        assert!(hits[0].1 > 0.8);
    }

    #[test]
    fn fuzzy_distance_cases() {
        assert_eq!(fuzzy_distance("kargo", "kargo"), 0);
        assert_eq!(fuzzy_distance("karga", "kargo"), 1);
        assert_eq!(fuzzy_distance("a", "abcdefgh"), FUZZY_TOO_FAR);
        // anagram-ish long strings share every char
        assert_eq!(fuzzy_distance("siparis", "sipaisr"), 0);
    }

    #[test]
    fn vocabulary_and_corrections() {
        let lex = sample();
        assert!(lex.vocabulary().iter().any(|w| w == "kargo"));
        assert_eq!(lex.vocabulary().iter().filter(|w| *w == "sipariş").count(), 1);
        assert_eq!(lex.correction("mrb"), Some("merhaba"));
        assert_eq!(lex.bigram_seeds()[0].1, vec!["size", "nasıl"]);
    }

    #[test]
    fn empty_and_malformed() {
        let lex = Lexicon::empty();
        assert!(lex.is_empty());
        assert!(lex.complete("a", 5).is_empty());
        let err = Lexicon::from_json_str("{ not json", Tokenizer::default());
        assert!(matches!(err, Err(Error::ReferenceData(_))));
    }
}
