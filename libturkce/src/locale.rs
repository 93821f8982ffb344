//! Turkish keyword tables, character confusions and display labels.
//!
//! Keyword lists are matched as lower-cased substrings of the analyzed text,
//! so short particles carry a leading space (" mi") to avoid matching inside
//! words.

use libsuggest_core::{BoostRule, ContextLexicon, Intent, Label, SuggestionLabels};
use phf::phf_map;
use std::collections::BTreeMap;

/// Turkish-specific letters and the ASCII letter they are commonly typed as.
///
/// Direction matters: a word folds `ş -> s`, never `s -> ş`.
pub static CHAR_FOLDS: phf::Map<char, char> = phf_map! {
    'ç' => 'c',
    'ğ' => 'g',
    'ı' => 'i',
    'ö' => 'o',
    'ş' => 's',
    'ü' => 'u',
    'â' => 'a',
    'î' => 'i',
    'û' => 'u',
};

/// Vowels including dotless ı and circumflexed loanword vowels.
pub const VOWELS: &str = "aeıioöuüâîû";

/// Likely next characters for scheduler prefetch.
pub const PREFETCH_CHARS: &str = "aeiıoöuürlnm";

/// Template triggers containing one of these mark apology templates.
pub const APOLOGY_CUES: &[&str] = &["özür", "şikayet"];

pub const GREETING: &[&str] = &[
    "merhaba", "selam", "hoşgeldin", "hoş geldin", "günaydın", "iyi günler", "iyi akşamlar",
    "nasılsın", "nasılsınız",
];
pub const FAREWELL: &[&str] = &[
    "görüşürüz", "hoşçakal", "hoşça kal", "güle güle", "görüşmek üzere", "kendine iyi bak",
    "elveda",
];
pub const THANKS: &[&str] = &[
    "teşekkür", "teşekkürler", "sağol", "sağ ol", "minnettarım",
];
pub const APOLOGY: &[&str] = &[
    "özür", "pardon", "kusura bakma", "affedersin", "üzgünüm", "maalesef",
];
pub const QUESTION: &[&str] = &[
    "nasıl", "neden", "ne zaman", "nerede", "kim", "kaç", "hangi", "acaba", " mi", " mı", " mu",
    " mü", "?",
];
pub const COMPLAINT: &[&str] = &[
    "şikayet", "sorun", "problem", "sıkıntı", "hata", "arıza", "berbat", "kötü", "rezalet",
    "kabul edilemez",
];
pub const REQUEST: &[&str] = &[
    "lütfen", "ister misin", "rica", "yapabilir misin", "yardım", "destek", "istiyorum",
    "ihtiyacım var",
];
pub const CONFIRMATION: &[&str] = &[
    "tamam", "oldu", "anladım", "evet", "tabi", "tabii", "olur", "kabul", "onay", "doğru",
];

pub const POSITIVE: &[&str] = &[
    "harika", "mükemmel", "süper", "güzel", "iyi", "mutlu", "memnun", "teşekkür", "başarılı",
    "sevindim",
];
pub const NEGATIVE: &[&str] = &[
    "kötü", "berbat", "rezalet", "korkunç", "üzgün", "sinir", "kızgın", "hata", "sorun",
    "problem",
];

/// Matched against the text padded with one space on each side.
pub const QUESTION_MARKERS: &[&str] = &[
    " mi ", " mı ", " mu ", " mü ", "nasıl", "neden", "ne zaman", "nerede", "kim", "kaç", "hangi",
];

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// `from=to` rules for the spell corrector, one per folded letter.
pub fn confusion_rules() -> Vec<String> {
    let mut rules: Vec<String> = CHAR_FOLDS
        .entries()
        .map(|(from, to)| format!("{}={}", from, to))
        .collect();
    rules.sort();
    rules
}

/// Fold Turkish letters to their ASCII look-alikes.
pub fn fold_ascii(word: &str) -> String {
    word.chars()
        .map(|c| CHAR_FOLDS.get(&c).copied().unwrap_or(c))
        .collect()
}

/// Classifier tables with the given canned responses.
pub fn context_lexicon(responses: BTreeMap<Intent, Vec<String>>) -> ContextLexicon {
    let intents: BTreeMap<Intent, Vec<String>> = [
        (Intent::Greeting, GREETING),
        (Intent::Farewell, FAREWELL),
        (Intent::Thanks, THANKS),
        (Intent::Apology, APOLOGY),
        (Intent::Question, QUESTION),
        (Intent::Complaint, COMPLAINT),
        (Intent::Request, REQUEST),
        (Intent::Confirmation, CONFIRMATION),
    ]
    .into_iter()
    .map(|(intent, words)| (intent, owned(words)))
    .collect();

    let boosts = vec![
        BoostRule {
            intent: Intent::Greeting,
            cues: owned(GREETING),
            bonus: 2.0,
        },
        BoostRule {
            intent: Intent::Thanks,
            cues: owned(&["rica", "bir şey"]),
            bonus: 2.0,
        },
        BoostRule {
            intent: Intent::Complaint,
            cues: owned(&["özür"]),
            bonus: 3.0,
        },
        // also fires for any detected question
        BoostRule {
            intent: Intent::Question,
            cues: owned(&["evet", "hayır"]),
            bonus: 1.0,
        },
    ];

    ContextLexicon {
        intents,
        positive: owned(POSITIVE),
        negative: owned(NEGATIVE),
        question_markers: owned(QUESTION_MARKERS),
        boosts,
        responses,
    }
}

pub fn labels() -> SuggestionLabels {
    SuggestionLabels {
        history: Label::new("Daha önce kullanıldı", "fas fa-history"),
        prediction: Label::new("Önerilen kelime", "fas fa-lightbulb"),
        completion: Label::new("Kelime tamamlama", "fas fa-keyboard"),
        dictionary: Label::new("Sözlük", "fas fa-book"),
        fuzzy: Label::new("Benzer kelime", "fas fa-search"),
        spellcheck: Label::new("Yazım düzeltmesi", "fas fa-spell-check"),
        correction: Label::new("Düzeltme", "fas fa-spell-check"),
        frequent: Label::new("Sık kullanılan", "fas fa-star"),
        context: Label::new("Önerilen yanıt", "fas fa-comment"),
        template_icon: "fas fa-bolt".to_string(),
    }
}
