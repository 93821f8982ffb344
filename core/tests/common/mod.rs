// core/tests/common/mod.rs
//
// Small fully-wired engine shared by the integration tests.

#![allow(dead_code)]

use libsuggest_core::{
    BoostRule, Config, ContextClassifier, ContextLexicon, HistoryStore, Intent, Lexicon,
    LexiconData, NGramPredictor, PredictionFusion, SpellConfig, SpellCorrector, TemplateIndex,
    TemplateSet,
};
use std::sync::Arc;

pub const TEMPLATES: &str = r#"{"categories": [
    {"key": "general", "name": "Genel", "icon": "fas fa-headset", "templates": [
        {"trigger": "/merhaba", "body": "Merhaba, size nasıl yardımcı olabilirim?", "description": "Karşılama"},
        {"trigger": "/bekle", "body": "Lütfen bekleyiniz, kontrol ediyorum.", "description": "Bekleme"}
    ]},
    {"key": "complaints", "name": "Şikayetler", "icon": "fas fa-exclamation", "templates": [
        {"trigger": "/özür", "body": "Yaşadığınız sorun için özür dileriz.", "description": "Özür"}
    ]}
]}"#;

pub fn lexicon_data() -> LexiconData {
    let words = [
        "merhaba", "nasıl", "teşekkür", "kargo", "kargonuz", "sipariş", "siparişiniz",
        "yardımcı", "iade", "ödeme", "bekleyiniz", "sorun",
    ];
    LexiconData {
        common_words: words.iter().map(|s| s.to_string()).collect(),
        bigrams: [("kargonuz".to_string(), vec!["yolda".to_string(), "hazır".to_string()])]
            .into_iter()
            .collect(),
        corrections: [("tşk".to_string(), "teşekkürler".to_string())].into_iter().collect(),
        ..Default::default()
    }
}

pub fn context_lexicon() -> ContextLexicon {
    let mut lex = ContextLexicon::default();
    lex.intents.insert(Intent::Complaint, vec!["sorun".into(), "şikayet".into()]);
    lex.intents.insert(Intent::Greeting, vec!["merhaba".into()]);
    lex.negative = vec!["sorun".into(), "kötü".into()];
    lex.boosts.push(BoostRule {
        intent: Intent::Complaint,
        cues: vec!["özür".into(), "üzgün".into()],
        bonus: 3.0,
    });
    lex.responses.insert(Intent::Complaint, vec!["Yaşadığınız sorun için özür dileriz.".into()]);
    lex.responses.insert(Intent::Neutral, vec!["Size nasıl yardımcı olabilirim?".into()]);
    lex
}

pub fn config() -> Config {
    Config {
        turkic_casing: true,
        spell: SpellConfig {
            confusions: vec!["ş=s".into(), "ü=u".into(), "ı=i".into()],
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn fusion_with(config: Config) -> PredictionFusion {
    let tok = config.tokenizer();
    let lexicon = Arc::new(Lexicon::new(lexicon_data(), tok).expect("lexicon"));
    let ngram = NGramPredictor::from_lexicon(&lexicon, config.ngram.clone(), tok);
    let spell = SpellCorrector::from_lexicon(&lexicon, config.spell.clone(), tok);
    let history = HistoryStore::new(config.history.clone(), tok);
    let templates = TemplateIndex::new(
        TemplateSet::from_json_str(TEMPLATES).expect("templates"),
        config.templates.clone(),
        tok,
    );
    let classifier = ContextClassifier::new(context_lexicon(), &config.command_marker, tok);

    PredictionFusion::builder(config)
        .lexicon(lexicon)
        .ngram(Arc::new(ngram))
        .spell(Arc::new(spell))
        .history(Arc::new(history))
        .templates(Arc::new(templates))
        .classifier(Arc::new(classifier))
        .build()
}

pub fn fusion() -> PredictionFusion {
    fusion_with(config())
}
