//! Tests for the TTL cache.

use super::*;

#[test]
fn test_miss_on_empty_cache() {
    let cache: TtlCache<String> = TtlCache::default();
    assert!(cache.get("https://upstream/doc").is_none());
    assert_eq!(cache.ttl(), DEFAULT_CACHE_TTL);
}

#[test]
fn test_hit_before_expiry() {
    let cache = TtlCache::new(Duration::from_secs(60));
    let start = Instant::now();
    cache.set_at("u", 7u32, start);

    assert_eq!(cache.get_at("u", start + Duration::from_secs(59)).as_deref(), Some(&7));
}

/// Verify expired entries read as misses but remain available stale.
#[test]
fn test_expired_entry_is_a_miss() {
    let cache = TtlCache::new(Duration::from_secs(60));
    let start = Instant::now();
    cache.set_at("u", 7u32, start);

    assert!(cache.get_at("u", start + Duration::from_secs(60)).is_none());
    assert_eq!(cache.get_stale("u").as_deref(), Some(&7));
}

#[test]
fn test_set_replaces_unconditionally() {
    let cache = TtlCache::new(Duration::from_secs(60));
    cache.set("u", "old".to_string());
    cache.set("u", "new".to_string());

    assert_eq!(cache.get("u").as_deref().map(String::as_str), Some("new"));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_keys_are_independent() {
    let cache = TtlCache::new(Duration::from_secs(60));
    cache.set("a", 1u8);
    cache.set("b", 2u8);

    assert_eq!(cache.get("a").as_deref(), Some(&1));
    assert_eq!(cache.get("b").as_deref(), Some(&2));
}
