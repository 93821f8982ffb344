//! Conversation context classification and suggestion re-ranking.
//!
//! `ContextClassifier` votes the preceding text into one intent using keyword
//! sets supplied by the language crate (`ContextLexicon`), scores sentiment
//! from positive/negative word lists, and boosts suggestions that fit the
//! detected intent. `ConversationTracker` keeps the last few analyses of the
//! incoming side of a chat and summarizes its flow.
use crate::candidate::{sort_by_score, Suggestion};
use crate::utils::{now_ms, Tokenizer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

/// Intent categories. Declaration order is the tie-break order for voting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Greeting,
    Farewell,
    Thanks,
    Apology,
    Question,
    Complaint,
    Request,
    Confirmation,
    #[default]
    Neutral,
}

impl Intent {
    pub const VOTING: [Intent; 8] = [
        Intent::Greeting,
        Intent::Farewell,
        Intent::Thanks,
        Intent::Apology,
        Intent::Question,
        Intent::Complaint,
        Intent::Request,
        Intent::Confirmation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Farewell => "farewell",
            Intent::Thanks => "thanks",
            Intent::Apology => "apology",
            Intent::Question => "question",
            Intent::Complaint => "complaint",
            Intent::Request => "request",
            Intent::Confirmation => "confirmation",
            Intent::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

/// Result of `ContextClassifier::analyze`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub intent: Intent,
    pub sentiment: Sentiment,
    /// (pos - neg) / max(pos + neg, 1), in [-1, 1]
    pub sentiment_score: f32,
    pub is_question: bool,
    /// Intent keywords found in the text
    pub keywords: Vec<String>,
}

/// Adds `bonus` to suggestions containing any cue when `intent` is detected.
///
/// A `Question` rule also fires for any text detected as a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostRule {
    pub intent: Intent,
    pub cues: Vec<String>,
    pub bonus: f32,
}

/// Keyword tables that drive classification. Empty tables classify
/// everything as neutral.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLexicon {
    pub intents: BTreeMap<Intent, Vec<String>>,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub question_markers: Vec<String>,
    pub boosts: Vec<BoostRule>,
    /// Canned replies per intent; `Neutral` doubles as the fallback list
    pub responses: BTreeMap<Intent, Vec<String>>,
}

const MAX_RESPONSES: usize = 5;
const NEUTRAL_RESPONSES: usize = 3;

#[derive(Debug)]
pub struct ContextClassifier {
    lexicon: ContextLexicon,
    command_marker: String,
    tokenizer: Tokenizer,
}

impl ContextClassifier {
    pub fn new(mut lexicon: ContextLexicon, command_marker: &str, tokenizer: Tokenizer) -> Self {
        let fold = |v: &mut Vec<String>| {
            for s in v.iter_mut() {
                *s = tokenizer.fold_case(s);
            }
            v.retain(|s| !s.is_empty());
        };
        lexicon.intents.values_mut().for_each(|v| fold(v));
        fold(&mut lexicon.positive);
        fold(&mut lexicon.negative);
        fold(&mut lexicon.question_markers);
        for rule in lexicon.boosts.iter_mut() {
            fold(&mut rule.cues);
        }
        Self {
            lexicon,
            command_marker: command_marker.to_string(),
            tokenizer,
        }
    }

    pub fn lexicon(&self) -> &ContextLexicon {
        &self.lexicon
    }

    pub fn analyze(&self, text: &str) -> ContextAnalysis {
        let lowered = self.tokenizer.key(text);
        if lowered.is_empty() {
            return ContextAnalysis::default();
        }

        let mut best = (Intent::Neutral, 0usize);
        let mut keywords: Vec<String> = Vec::new();
        for intent in Intent::VOTING {
            let Some(words) = self.lexicon.intents.get(&intent) else {
                continue;
            };
            let mut hits = 0;
            for w in words.iter().filter(|w| lowered.contains(w.as_str())) {
                hits += 1;
                if !keywords.contains(w) {
                    keywords.push(w.clone());
                }
            }
            // strict: ties keep the earlier intent
            if hits > best.1 {
                best = (intent, hits);
            }
        }

        let pos = self.lexicon.positive.iter().filter(|w| lowered.contains(w.as_str())).count();
        let neg = self.lexicon.negative.iter().filter(|w| lowered.contains(w.as_str())).count();
        let sentiment_score = (pos as f32 - neg as f32) / (pos + neg).max(1) as f32;
        let sentiment = if sentiment_score > 0.2 {
            Sentiment::Positive
        } else if sentiment_score < -0.2 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        };

        let analysis = ContextAnalysis {
            intent: best.0,
            sentiment,
            sentiment_score,
            is_question: self.is_question_folded(&lowered),
            keywords,
        };
        tracing::debug!(intent = %analysis.intent, score = sentiment_score, "context analyzed");
        analysis
    }

    pub fn is_question(&self, text: &str) -> bool {
        self.is_question_folded(&self.tokenizer.key(text))
    }

    fn is_question_folded(&self, lowered: &str) -> bool {
        if lowered.ends_with('?') {
            return true;
        }
        let padded = format!(" {} ", lowered);
        self.lexicon
            .question_markers
            .iter()
            .any(|m| padded.contains(m.as_str()))
    }

    pub fn is_command(&self, text: &str) -> bool {
        !self.command_marker.is_empty() && text.trim_start().starts_with(&self.command_marker)
    }

    /// Keyword set of an intent, for callers that score their own entries.
    pub fn markers(&self, intent: Intent) -> &[String] {
        self.lexicon
            .intents
            .get(&intent)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Up to five canned replies for the intent; three from the neutral list
    /// when the intent has none.
    pub fn suggested_responses(&self, intent: Intent) -> Vec<String> {
        match self.lexicon.responses.get(&intent).filter(|v| !v.is_empty()) {
            Some(list) => list.iter().take(MAX_RESPONSES).cloned().collect(),
            None => self
                .lexicon
                .responses
                .get(&Intent::Neutral)
                .map(|v| v.iter().take(NEUTRAL_RESPONSES).cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Context bonus a suggestion text would receive under `analysis`.
    pub fn boost_for(&self, text: &str, analysis: &ContextAnalysis) -> f32 {
        let lowered = self.tokenizer.fold_case(text);
        self.lexicon
            .boosts
            .iter()
            .filter(|rule| {
                rule.intent == analysis.intent || (rule.intent == Intent::Question && analysis.is_question)
            })
            .filter(|rule| rule.cues.iter().any(|c| lowered.contains(c.as_str())))
            .map(|rule| rule.bonus)
            .sum()
    }

    /// Apply context bonuses and re-sort (stable, descending).
    ///
    /// Bonuses replace any previously applied boost, so applying twice gives
    /// the same scores as applying once.
    pub fn prioritize_suggestions(&self, mut suggestions: Vec<Suggestion>, analysis: &ContextAnalysis) -> Vec<Suggestion> {
        for s in suggestions.iter_mut() {
            let boost = self.boost_for(&s.text, analysis);
            s.set_context_boost(boost);
        }
        sort_by_score(&mut suggestions);
        suggestions
    }
}

/// An analysis recorded by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedAnalysis {
    pub text: String,
    pub analysis: ContextAnalysis,
    pub timestamp: u64,
}

/// Summary of the recent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationFlow {
    /// Sentiment dropped in at least half of the recent steps
    pub escalating: bool,
    /// A complaint with no confirmation after it
    pub needs_resolution: bool,
    /// Last intent was a farewell
    pub ending: bool,
    pub dominant_intent: Intent,
    pub average_sentiment: f32,
}

const FLOW_WINDOW: usize = 5;

#[derive(Debug)]
pub struct ConversationTracker {
    entries: RwLock<VecDeque<TrackedAnalysis>>,
    capacity: usize,
}

impl Default for ConversationTracker {
    fn default() -> Self {
        Self::new(20)
    }
}

impl ConversationTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, text: &str, analysis: ContextAnalysis) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push_back(TrackedAnalysis {
                text: text.to_string(),
                analysis,
                timestamp: now_ms(),
            });
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }
    }

    pub fn last(&self) -> Option<TrackedAnalysis> {
        self.entries.read().ok()?.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Flow over the last five analyses; `None` with fewer than two.
    pub fn flow(&self) -> Option<ConversationFlow> {
        let entries = self.entries.read().ok()?;
        if entries.len() < 2 {
            return None;
        }
        let recent: Vec<&ContextAnalysis> = entries
            .iter()
            .skip(entries.len().saturating_sub(FLOW_WINDOW))
            .map(|t| &t.analysis)
            .collect();

        let scores: Vec<f32> = recent.iter().map(|a| a.sentiment_score).collect();
        let drops = scores.windows(2).filter(|w| w[1] < w[0]).count();
        let escalating = scores.len() >= 3 && drops >= scores.len() / 2;

        let last_complaint = recent.iter().rposition(|a| a.intent == Intent::Complaint);
        let needs_resolution = match last_complaint {
            Some(i) => !recent[i + 1..].iter().any(|a| a.intent == Intent::Confirmation),
            None => false,
        };

        // most frequent; ties go to the most recently seen
        let mut counts: Vec<(Intent, usize, usize)> = Vec::new();
        for (pos, a) in recent.iter().enumerate() {
            match counts.iter_mut().find(|(i, _, _)| *i == a.intent) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 = pos;
                }
                None => counts.push((a.intent, 1, pos)),
            }
        }
        let dominant_intent = counts
            .iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)))
            .map(|(i, _, _)| *i)
            .unwrap_or_default();

        Some(ConversationFlow {
            escalating,
            needs_resolution,
            ending: recent.last().map(|a| a.intent == Intent::Farewell).unwrap_or(false),
            dominant_intent,
            average_sentiment: scores.iter().sum::<f32>() / scores.len() as f32,
        })
    }
}
