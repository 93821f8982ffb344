// core/tests/cache_management.rs
//
// Integration tests for the fusion result cache.
//
// Tests cover:
// - Hit/miss tracking statistics
// - Capacity bound (LRU eviction)
// - TTL expiry
// - Invalidation on learn_from_message
// - Cache statistics API

mod common;

use libsuggest_core::Config;

#[test]
fn test_cache_hit_miss_tracking() {
    let engine = common::fusion();

    // First call is a miss
    let first = engine.predict("kar");
    assert_eq!(engine.cache_stats(), (0, 1));

    // Same input (different case) is a hit with identical results
    let second = engine.predict("KAR");
    assert_eq!(engine.cache_stats(), (1, 1));
    assert_eq!(first, second);

    assert_eq!(engine.cache_hit_rate(), Some(50.0));
}

#[test]
fn test_trailing_whitespace_is_part_of_the_key() {
    let engine = common::fusion();
    engine.predict("kargonuz");
    engine.predict("kargonuz ");
    assert_eq!(engine.cache_stats(), (0, 2));
    assert_eq!(engine.cache_size(), 2);
}

#[test]
fn test_cache_respects_capacity() {
    let mut cfg = common::config();
    cfg.cache.capacity = 2;
    let engine = common::fusion_with(cfg);
    assert_eq!(engine.cache_capacity(), 2);

    engine.predict("kar");
    engine.predict("sip");
    engine.predict("ter");
    assert_eq!(engine.cache_size(), 2);

    // "kar" was evicted first
    engine.predict("kar");
    assert_eq!(engine.cache_stats(), (0, 4));
}

#[test]
fn test_cache_ttl_expiry() {
    let mut cfg = common::config();
    cfg.cache.ttl_ms = 20;
    let engine = common::fusion_with(cfg);

    engine.predict("kar");
    std::thread::sleep(std::time::Duration::from_millis(40));
    engine.predict("kar");
    assert_eq!(engine.cache_stats(), (0, 2));
}

#[test]
fn test_cache_invalidation_on_learn() {
    let engine = common::fusion();
    engine.predict("kargonuz ");
    engine.predict("sip");
    assert_eq!(engine.cache_size(), 2);

    engine.learn_from_message("kargonuz bugün teslim edilecek");
    assert_eq!(engine.cache_size(), 0);

    // Counters survive invalidation
    assert_eq!(engine.cache_stats(), (0, 2));
    let after = engine.predict("kargonuz ");
    assert!(after.iter().any(|s| s.text == "bugün"));
}

#[test]
fn test_empty_input_is_not_cached() {
    let engine = common::fusion();
    engine.predict("");
    engine.predict("  ");
    assert_eq!(engine.cache_stats(), (0, 0));
    assert_eq!(engine.cache_size(), 0);
}

#[test]
fn test_clear_cache_resets_statistics() {
    let engine = common::fusion();
    engine.predict("kar");
    engine.predict("kar");
    engine.clear_cache();
    assert_eq!(engine.cache_stats(), (0, 0));
    assert_eq!(engine.cache_size(), 0);
    assert_eq!(engine.cache_hit_rate(), None);
}

#[test]
fn test_zero_capacity_config_still_caches_one() {
    let cfg = Config {
        cache: libsuggest_core::CacheConfig { ttl_ms: 5000, capacity: 0 },
        ..common::config()
    };
    let engine = common::fusion_with(cfg);
    assert_eq!(engine.cache_capacity(), 1);
}
