use super::*;

fn small_config() -> CacheConfig {
    CacheConfig {
        embeddings: CacheNamespaceConfig::new(60, 10),
        query_results: CacheNamespaceConfig::new(60, 10),
        agent_collections: CacheNamespaceConfig::new(60, 10),
        ..CacheConfig::default()
    }
}

#[test]
fn normalizes_queries() {
    assert_eq!(normalize_query("  Lazy   DOG\tsleeps\n"), "lazy dog sleeps");
    assert_eq!(normalize_query("lazy dog"), "lazy dog");
    assert_eq!(normalize_query("   "), "");
}

#[test]
fn default_namespaces() {
    let config = CacheConfig::default();
    assert!(config.enabled);
    assert_eq!(config.embeddings.ttl(), Duration::from_secs(7 * 24 * 60 * 60));
    assert_eq!(config.query_results.max_keys, 100_000);
    assert_eq!(config.agent_collections.max_keys, 10_000);
    assert!((config.query_results.soft_ceiling_ratio - 0.8).abs() < f64::EPSILON);
}

#[test]
fn namespaces_are_independent() {
    let cache = CacheLayer::new(&small_config());
    cache.set_embedding("lazy dog".to_string(), Arc::new(vec![0.5, 0.5]));
    cache.set_agent_collection("lazy dog".to_string(), "kb_x".to_string());

    assert_eq!(
        cache.get_embedding("lazy dog").as_deref(),
        Some(&vec![0.5, 0.5])
    );
    assert_eq!(cache.get_agent_collection("lazy dog"), Some("kb_x".to_string()));
    assert_eq!(cache.get_query_results("lazy dog"), None);

    let stats = cache.stats();
    assert_eq!(stats.embeddings.keys, 1);
    assert_eq!(stats.agent_collections.keys, 1);
    assert_eq!(stats.query_results.keys, 0);
    assert_eq!(stats.query_results.requests, 1);
    assert_eq!(stats.query_results.hits, 0);
}

#[test]
fn query_key_changes_after_invalidation() {
    let cache = CacheLayer::new(&small_config());
    let before = cache.query_key("c1", 5, "lazy dog");
    cache.set_query_results(before.clone(), Arc::new(vec!["chunk".to_string()]));
    assert!(cache.get_query_results(&before).is_some());

    cache.invalidate_collection("c1");
    let after = cache.query_key("c1", 5, "lazy dog");

    assert_ne!(before, after);
    assert!(cache.get_query_results(&after).is_none());
    // Other collections keep their keys
    assert_eq!(cache.query_key("c2", 5, "lazy dog"), "c2#0:5:lazy dog");
}

#[test]
fn forgetting_a_collection_never_revives_old_results() {
    let cache = CacheLayer::new(&small_config());
    let untouched = cache.query_key("c1", 5, "lazy dog");
    cache.set_query_results(untouched.clone(), Arc::new(vec!["old".to_string()]));

    cache.invalidate_collection("c1");
    cache.invalidate_collection("c2");
    assert_eq!(cache.tracked_collections(), 2);

    cache.forget_collection("c1");

    assert_eq!(cache.tracked_collections(), 1);
    let after = cache.query_key("c1", 5, "lazy dog");
    assert_ne!(after, untouched);
    assert!(cache.get_query_results(&after).is_none());
    // Collections that keep their epoch are unaffected
    assert!(cache.query_key("c2", 5, "q").starts_with("c2#2:"));
}

#[test]
fn query_key_includes_top_k() {
    let cache = CacheLayer::new(&small_config());
    assert_ne!(
        cache.query_key("c1", 1, "lazy dog"),
        cache.query_key("c1", 5, "lazy dog")
    );
}

#[test]
fn disabled_layer_always_misses() {
    let config = CacheConfig {
        enabled: false,
        ..small_config()
    };
    let cache = CacheLayer::new(&config);

    cache.set_embedding("q".to_string(), Arc::new(vec![1.0]));
    cache.set_query_results("k".to_string(), Arc::new(vec!["v".to_string()]));
    cache.set_agent_collection("agent".to_string(), "kb".to_string());

    assert!(cache.get_embedding("q").is_none());
    assert!(cache.get_query_results("k").is_none());
    assert!(cache.get_agent_collection("agent").is_none());

    let stats = cache.stats();
    assert!(!stats.enabled);
    assert_eq!(stats.embeddings.keys, 0);
    assert_eq!(stats.embeddings.requests, 0);
}

#[test]
fn flush_all_clears_every_namespace() {
    let cache = CacheLayer::new(&small_config());
    cache.set_embedding("q".to_string(), Arc::new(vec![1.0]));
    cache.set_query_results("k".to_string(), Arc::new(vec!["v".to_string()]));
    cache.set_agent_collection("agent".to_string(), "kb".to_string());

    cache.flush_all();

    let stats = cache.stats();
    assert_eq!(stats.embeddings.keys, 0);
    assert_eq!(stats.query_results.keys, 0);
    assert_eq!(stats.agent_collections.keys, 0);
}

#[test]
fn compaction_triggers_above_soft_ceiling() {
    let cache = CacheLayer::new(&small_config());
    for i in 0..10 {
        cache.set_agent_collection(format!("agent{}", i), format!("kb_{}", i));
        std::thread::sleep(Duration::from_millis(1));
    }

    // Outside a runtime the pass runs inline
    assert!(cache.stats().agent_collections.keys <= 9);
    assert_eq!(cache.compact_all(), 0);
}

#[test]
fn hit_rate_stays_in_range() {
    let cache = CacheLayer::new(&small_config());
    cache.set_embedding("q".to_string(), Arc::new(vec![1.0]));
    for _ in 0..3 {
        cache.get_embedding("q");
    }
    cache.get_embedding("other");

    let rate = cache.stats().embeddings.hit_rate;
    assert!((0.0..=1.0).contains(&rate));
    assert!((rate - 0.75).abs() < f64::EPSILON);
}
