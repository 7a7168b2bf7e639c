use std::time::Duration;

use soph_cache::TtlCache;

#[tokio::test]
async fn test_cache_hit() {
    let cache = TtlCache::new(Duration::from_secs(60), Duration::from_secs(60));
    cache.set("key", "value".to_string()).await;
    assert_eq!(cache.get("key").await, Some("value".to_string()));
    cache.close();
}

#[tokio::test]
async fn test_cache_miss() {
    let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(60), Duration::from_secs(60));
    assert_eq!(cache.get("missing").await, None);
    cache.close();
}

#[tokio::test]
async fn test_cache_expiry() {
    let cache = TtlCache::new(Duration::from_millis(50), Duration::from_secs(60));
    cache.set("key", 7u64).await;
    assert_eq!(cache.get("key").await, Some(7));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get("key").await, None);
    cache.close();
}

#[tokio::test]
async fn test_cache_delete() {
    let cache = TtlCache::new(Duration::from_secs(60), Duration::from_secs(60));
    cache.set("key", 1u8).await;
    cache.delete("key").await;
    assert_eq!(cache.get("key").await, None);
    cache.close();
}

#[tokio::test]
async fn test_set_refreshes_expiry() {
    let cache = TtlCache::new(Duration::from_millis(80), Duration::from_secs(60));
    cache.set("key", 1u8).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    cache.set("key", 2u8).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The rewrite stamped a new expiry, so the entry is still live.
    assert_eq!(cache.get("key").await, Some(2));
    cache.close();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let cache = TtlCache::new(Duration::from_secs(60), Duration::from_secs(60));
    cache.set("key", 1u8).await;
    cache.close();
    cache.close();
    // Entries still honour their TTL on access after close.
    assert_eq!(cache.get("key").await, Some(1));
}

#[tokio::test]
async fn test_clones_share_one_map() {
    let cache = TtlCache::new(Duration::from_secs(60), Duration::from_secs(60));
    let other = cache.clone();
    cache.set("key", 9u8).await;
    assert_eq!(other.get("key").await, Some(9));
    other.delete("key").await;
    assert_eq!(cache.get("key").await, None);
    cache.close();
}
