// core/tests/persistence.rs
//
// Learned state survives a save/load cycle through both StateStore
// backends, and corrupt entries degrade to empty state.

mod common;

use libsuggest_core::store::keys;
use libsuggest_core::{NGramConfig, NGramPredictor, StateStore};

#[test]
fn ngram_round_trip_reproduces_predictions() {
    let engine = common::fusion();
    engine.learn_from_message("iade talebiniz alındı");
    engine.learn_from_message("iade süreci başladı");
    let ngram = engine.ngram().expect("ngram");

    let bytes = ngram.to_bytes().expect("encode");
    let restored =
        NGramPredictor::from_bytes(&bytes, NGramConfig::default(), engine.tokenizer()).expect("decode");

    for (context, prefix) in [("iade", ""), ("iade", "s"), ("", "ka"), ("kargonuz", "")] {
        assert_eq!(ngram.predict(context, prefix), restored.predict(context, prefix));
    }
    assert_eq!(ngram.stats(), restored.stats());
}

#[test]
fn redb_state_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.redb");
    {
        let engine = common::fusion();
        engine.learn_from_message("iade talebiniz alındı");
        engine
            .templates()
            .expect("templates")
            .add_custom_template("/iade", "İade talebiniz alındı.", "İade")
            .expect("add");
        engine.spell().expect("spell").add_word("kargocu");

        let store = StateStore::open_redb(&path).expect("open");
        engine.save_state(&store).expect("save");
    }

    let store = StateStore::open_redb(&path).expect("reopen");
    assert_eq!(
        store.keys().expect("keys"),
        vec!["history", "ngram", "templates.custom", "vocabulary"]
    );

    let engine = common::fusion();
    assert_eq!(engine.load_state(&store), 4);
    let out = engine.predict("iade ");
    assert!(out.iter().any(|s| s.text == "talebiniz"));
    let out = engine.predict("/ia");
    assert_eq!(out[0].text, "İade talebiniz alındı.");
    assert!(engine.spell().expect("spell").is_known("kargocu"));
}

#[test]
fn corrupt_entries_fail_soft() {
    let store = StateStore::in_memory();
    store.put(keys::NGRAM, b"not bincode").expect("put");
    store.put(keys::HISTORY, &[]).expect("put");
    store.put(keys::CUSTOM_TEMPLATES, b"{broken").expect("put");
    store.put(keys::VOCABULARY, br#"["kargocu"]"#).expect("put");

    let engine = common::fusion();
    assert_eq!(engine.load_state(&store), 1);
    // seeded tables untouched by the failed load
    let out = engine.predict("kargonuz ");
    assert_eq!(out[0].text, "yolda");
    assert!(engine.history().expect("history").is_empty());
}

#[test]
fn missing_entries_load_nothing() {
    let engine = common::fusion();
    assert_eq!(engine.load_state(&StateStore::in_memory()), 0);
}
