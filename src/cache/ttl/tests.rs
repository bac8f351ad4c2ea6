use super::*;
use std::thread::sleep;

fn cache(ttl: Duration, max_keys: usize) -> TtlCache<String, u32> {
    TtlCache::new("test", ttl, max_keys, 0.8)
}

#[test]
fn set_then_get() {
    let cache = cache(Duration::from_secs(60), 10);
    assert!(cache.set("a".to_string(), 1));

    assert_eq!(cache.get("a"), Some(1));
    assert_eq!(cache.get("missing"), None);
    assert_eq!(cache.len(), 1);
}

#[test]
fn entries_expire() {
    let cache = cache(Duration::from_millis(20), 10);
    cache.set("a".to_string(), 1);
    assert_eq!(cache.get("a"), Some(1));

    sleep(Duration::from_millis(40));
    assert_eq!(cache.get("a"), None);
}

#[test]
fn overwrite_refreshes_value() {
    let cache = cache(Duration::from_secs(60), 10);
    cache.set("a".to_string(), 1);
    cache.set("a".to_string(), 2);

    assert_eq!(cache.get("a"), Some(2));
    assert_eq!(cache.len(), 1);
}

#[test]
fn hit_rate_accounting() {
    let cache = cache(Duration::from_secs(60), 10);
    assert!(cache.hit_rate().abs() < f64::EPSILON);

    cache.set("a".to_string(), 1);
    cache.get("a");
    cache.get("a");
    cache.get("b");
    cache.get("c");

    assert_eq!(cache.requests(), 4);
    assert_eq!(cache.hits(), 2);
    assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);

    // Flushing does not reset the counters
    cache.flush_all();
    assert_eq!(cache.requests(), 4);
    assert_eq!(cache.hits(), 2);
}

#[test]
fn flush_all_empties_cache() {
    let cache = cache(Duration::from_secs(60), 10);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);

    cache.flush_all();

    assert!(cache.is_empty());
    assert_eq!(cache.get("a"), None);
}

#[test]
fn hard_max_refuses_new_keys() {
    let cache = cache(Duration::from_secs(60), 2);
    assert!(cache.set("a".to_string(), 1));
    assert!(cache.set("b".to_string(), 2));

    assert!(!cache.set("c".to_string(), 3));
    assert_eq!(cache.get("c"), None);

    // Existing keys can still be updated
    assert!(cache.set("a".to_string(), 10));
    assert_eq!(cache.get("a"), Some(10));
}

#[test]
fn keys_held_by_a_running_compaction_can_be_updated_at_hard_max() {
    let cache = cache(Duration::from_secs(60), 2);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);

    // Detach the live table the way a compaction pass does
    {
        let mut tables = cache.tables.write();
        let detached = Arc::new(mem::take(&mut tables.live));
        tables.retiring = Some(detached);
    }

    assert!(cache.set("a".to_string(), 10));
    assert!(!cache.set("c".to_string(), 3));
    assert_eq!(cache.get("a"), Some(10));
    assert_eq!(cache.get("b"), Some(2));
}

#[test]
fn soft_ceiling_from_ratio() {
    let cache = cache(Duration::from_secs(60), 10);
    assert_eq!(cache.soft_ceiling(), 8);

    let tiny: TtlCache<String, u32> = TtlCache::new("tiny", Duration::from_secs(1), 1, 0.5);
    assert_eq!(tiny.soft_ceiling(), 1);
}

#[test]
fn compaction_drops_expired_entries() {
    let cache = cache(Duration::from_millis(20), 10);
    cache.set("old".to_string(), 1);
    sleep(Duration::from_millis(40));

    let removed = cache.compact();

    assert_eq!(removed, 1);
    assert!(cache.is_empty());
}

#[test]
fn compaction_keeps_longest_lived_entries() {
    let cache = cache(Duration::from_millis(500), 10);
    for i in 0..10 {
        cache.set(format!("k{}", i), i);
        sleep(Duration::from_millis(2));
    }
    assert!(cache.needs_compaction());

    let removed = cache.compact();

    assert_eq!(removed, 2);
    assert_eq!(cache.len(), 8);
    // The two oldest entries have the least TTL left
    assert_eq!(cache.get("k0"), None);
    assert_eq!(cache.get("k1"), None);
    assert_eq!(cache.get("k9"), Some(9));
    assert!(!cache.needs_compaction());
}

#[test]
fn compaction_makes_room_at_hard_max() {
    let cache = cache(Duration::from_secs(60), 5);
    for i in 0..5 {
        cache.set(format!("k{}", i), i);
        sleep(Duration::from_millis(2));
    }
    assert!(!cache.set("new".to_string(), 99));

    cache.compact();

    assert!(cache.set("new".to_string(), 99));
    assert_eq!(cache.get("new"), Some(99));
}

#[test]
fn concurrent_access_during_compaction() {
    let cache = Arc::new(cache(Duration::from_secs(60), 2000));
    for i in 0..1000 {
        cache.set(format!("k{}", i), i);
    }

    let writer = {
        let cache = Arc::clone(&cache);
        std::thread::spawn(move || {
            for i in 0..100 {
                cache.get(&format!("k{}", i));
                cache.set(format!("new{}", i), i);
            }
        })
    };
    cache.compact();
    writer.join().expect("writer thread should finish");

    assert_eq!(cache.len(), 1100);
    // The last write is never lost to a concurrent compaction
    assert_eq!(cache.get("new99"), Some(99));
}
