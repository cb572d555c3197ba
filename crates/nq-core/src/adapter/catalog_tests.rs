//! Tests for the catalog resource cache.

use super::*;
use crate::adapter::testing::ScriptedUpstream;

const URL: &str = "https://catalog/resources";

#[test]
fn test_parse_catalog_shapes() {
    let list = parse_catalog(URL, br#"[{"name":"kms","active":true}]"#).unwrap();
    let envelope = parse_catalog(URL, br#"{"resources":[{"name":"kms"},{"name":"iam"}]}"#).unwrap();

    assert_eq!(list.len(), 1);
    assert_eq!(envelope.len(), 2);
}

#[test]
fn test_inactive_resources_are_not_offered() {
    let mut retired = CloudResource::new("old");
    retired.active = false;
    let snapshot = CatalogSnapshot::new(vec![CloudResource::new("kms"), retired]);

    assert!(snapshot.active("kms").is_some());
    assert!(snapshot.active("old").is_none());
}

#[tokio::test]
async fn test_snapshot_is_cached_within_ttl() {
    let upstream = Arc::new(ScriptedUpstream::new());
    upstream.serve(URL, r#"[{"name":"kms","active":true}]"#);
    let cache = CatalogCache::new(upstream.clone(), URL, Duration::from_secs(60));

    cache.snapshot().await.unwrap();
    cache.snapshot().await.unwrap();

    assert_eq!(upstream.calls_to(URL), 1);
}

/// Verify a failed refresh keeps serving the previous snapshot.
#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let upstream = Arc::new(ScriptedUpstream::new());
    upstream.serve(URL, r#"[{"name":"kms","active":true}]"#);
    let cache = CatalogCache::new(upstream.clone(), URL, Duration::ZERO);

    let first = cache.snapshot().await.unwrap();
    upstream.fail(URL, 502);
    let second = cache.snapshot().await.unwrap();

    assert_eq!(upstream.calls_to(URL), 2);
    assert!(second.active("kms").is_some());
    assert_eq!(first.fetched_at, second.fetched_at);
}

#[tokio::test]
async fn test_first_failure_is_an_error() {
    let upstream = Arc::new(ScriptedUpstream::new());
    upstream.fail(URL, 500);
    let cache = CatalogCache::new(upstream, URL, Duration::from_secs(60));

    assert!(cache.snapshot().await.is_err());
    assert!(cache.current().is_none());
}
