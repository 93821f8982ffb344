// libturkce/tests/turkish_integration.rs
//
// End-to-end behavior of the bundled Turkish engine.

use libturkce::{Engine, Intent, ReplacementMode, SourceKind, TurkceConfig};
use std::collections::HashMap;

fn score_of(engine: &Engine, input: &str, text: &str) -> Option<f32> {
    engine
        .predict(input)
        .into_iter()
        .find(|s| s.text == text)
        .map(|s| s.score)
}

#[test]
fn consonant_shorthand_is_not_corrected() {
    let engine = Engine::bundled();
    assert!(engine.check("mntk").is_empty());
    assert!(engine.check("slm").is_empty());
}

#[test]
fn ascii_typed_word_corrects_to_turkish_spelling() {
    let engine = Engine::bundled();
    let corrections = engine.check("tesekkur");
    let top = corrections.first().expect("a correction");
    assert_eq!(top.word, "teşekkür");
    assert!(top.confidence >= 0.85, "confidence {}", top.confidence);
}

#[test]
fn known_words_need_no_correction() {
    let engine = Engine::bundled();
    assert!(engine.check("teşekkür").is_empty());
    assert!(engine.check("TEŞEKKÜR").is_empty());
}

#[test]
fn learned_phrase_does_not_lose_rank() {
    let engine = Engine::bundled();
    let mut last = score_of(&engine, "merhaba nasıls", "nasılsınız").unwrap_or(0.0);
    for _ in 0..3 {
        engine.learn("merhaba nasılsınız").expect("learn");
        let now = score_of(&engine, "merhaba nasıls", "nasılsınız").expect("learned word suggested");
        assert!(now >= last, "{now} < {last}");
        last = now;
    }
}

#[test]
fn learned_continuation_is_predicted_after_space() {
    let engine = Engine::bundled();
    engine.learn("merhaba nasılsınız").expect("learn");
    let suggestions = engine.predict("merhaba ");
    let learned = suggestions
        .iter()
        .find(|s| s.text == "nasılsınız")
        .expect("learned continuation");
    assert_eq!(learned.replacement, ReplacementMode::InsertAfterCursor);
}

#[test]
fn complaint_context_boosts_apology_words() {
    let engine = Engine::bundled();
    let suggestions = engine.predict("bu sorun çok kötü öz");

    let apology = suggestions
        .iter()
        .find(|s| s.text == "özür")
        .expect("özür suggested");
    assert_eq!(apology.context_boost, 3.0);
    for other in suggestions.iter().filter(|s| s.text != "özür") {
        assert_eq!(other.context_boost, 0.0, "{}", other.text);
    }
    assert!(suggestions.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn incoming_complaint_drives_empty_input_replies() {
    let engine = Engine::bundled();
    let analysis = engine
        .observe("Siparişim hâlâ gelmedi, bu büyük bir sorun!")
        .expect("classifier enabled");
    assert_eq!(analysis.intent, Intent::Complaint);

    let suggestions = engine.predict("");
    assert!(!suggestions.is_empty());
    assert!(suggestions.iter().any(|s| s.source == SourceKind::Context));
}

#[test]
fn shortcut_templates_expand_whole_input() {
    let engine = Engine::bundled();
    let suggestions = engine.predict("/mrb");
    let first = suggestions.first().expect("template match");
    assert_eq!(first.source, SourceKind::Template);
    assert_eq!(first.replacement, ReplacementMode::ReplaceEntireInput);
    assert!(first.text.starts_with("Merhaba"));
    assert_eq!(first.metadata.get("trigger").map(String::as_str), Some("/mrb"));
}

#[test]
fn bundled_template_placeholders_fill() {
    let engine = Engine::bundled();
    let values = HashMap::from([
        ("kargo_no".to_string(), "TR-4411".to_string()),
        ("kargo_firma".to_string(), "Yurtiçi".to_string()),
    ]);
    let body = engine.fill_template("/kargo", &values).expect("template");
    assert!(body.contains("TR-4411"));
    assert!(body.contains("Yurtiçi"));
    assert!(!body.contains('{'));
}

#[test]
fn categories_are_listed_with_counts() {
    let engine = Engine::bundled();
    let categories = engine.template_categories();
    let shortcuts = categories
        .iter()
        .find(|c| c.key == "shortcuts")
        .expect("shortcuts category");
    assert!(shortcuts.template_count >= 10);
    assert_eq!(engine.templates("shortcuts").len(), shortcuts.template_count);
}

#[test]
fn disabled_sources_stay_silent() {
    let mut config = TurkceConfig::default();
    for kind in SourceKind::ALL {
        config.base_mut().set_source_enabled(kind, false);
    }
    config.base_mut().set_source_enabled(SourceKind::Template, true);
    let engine = Engine::with_data(config, libturkce::ReferenceData::load(None));

    assert!(engine.predict("merhaba nası").is_empty());
    assert!(!engine.predict("/mrb").is_empty());
}

#[test]
fn autosave_persists_each_learned_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = TurkceConfig {
        state_path: Some(dir.path().join("turkce.redb")),
        autosave: true,
        ..TurkceConfig::default()
    };

    {
        let engine = Engine::new(config.clone()).expect("engine");
        engine.learn("iadeniz onaylandı").expect("learn");
    }

    let engine = Engine::new(config).expect("reopen");
    let entry = engine
        .fusion()
        .history()
        .and_then(|h| h.entry("iadeniz"))
        .expect("persisted word");
    assert_eq!(entry.count, 1);
}
