use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use soph_core::{Error, Id};
use soph_data::{MemoryStore, NewUser, User, UserStore, UserUpdate};
use soph_services::{CacheOptions, UserStoreCache};

/// Counts how often each lookup path reaches the primary store.
struct CountingStore {
    inner: MemoryStore,
    by_id: AtomicUsize,
    by_token: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            by_id: AtomicUsize::new(0),
            by_token: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UserStore for CountingStore {
    async fn get_user(&self, id: Id) -> Result<User, Error> {
        self.by_id.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user(id).await
    }
    async fn get_user_by_name(&self, name: &str) -> Result<User, Error> {
        self.inner.get_user_by_name(name).await
    }
    async fn get_user_by_email(&self, email: &str) -> Result<User, Error> {
        self.inner.get_user_by_email(email).await
    }
    async fn get_user_by_protected_token(&self, protected: &[u8]) -> Result<User, Error> {
        self.by_token.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user_by_protected_token(protected).await
    }
    async fn list_users(&self, after: Option<Id>, limit: usize) -> Result<Vec<User>, Error> {
        self.inner.list_users(after, limit).await
    }
    async fn create_user(&self, new: NewUser) -> Result<User, Error> {
        self.inner.create_user(new).await
    }
    async fn update_user(&self, id: Id, update: UserUpdate) -> Result<User, Error> {
        self.inner.update_user(id, update).await
    }
    async fn delete_user(&self, id: Id) -> Result<(), Error> {
        self.inner.delete_user(id).await
    }
    async fn rotate_user_token(&self, id: Id, protected: Vec<u8>) -> Result<User, Error> {
        self.inner.rotate_user_token(id, protected).await
    }
}

fn options() -> CacheOptions {
    CacheOptions {
        ttl: Duration::from_secs(60),
        cleanup_interval: Duration::from_secs(60),
    }
}

fn new_user(name: &str, token: u8) -> NewUser {
    NewUser {
        name: name.to_string(),
        email: format!("{name}@example.com"),
        protected_token: vec![token; 32],
        is_admin: false,
        default_profile: None,
    }
}

#[tokio::test]
async fn test_get_by_id_hits_cache_after_create() {
    let store = Arc::new(CountingStore::new());
    let cache = UserStoreCache::new(store.clone(), options());

    let user = cache.create_user(new_user("alice", 1)).await.unwrap();
    for _ in 0..3 {
        cache.get_user(user.id).await.unwrap();
    }
    assert_eq!(store.by_id.load(Ordering::SeqCst), 0);
    cache.close();
}

#[tokio::test]
async fn test_alias_caches_delegate_to_id_cache() {
    let store = Arc::new(CountingStore::new());
    let cache = UserStoreCache::new(store.clone(), options());

    let user = cache.create_user(new_user("alice", 1)).await.unwrap();
    let by_name = cache.get_user_by_name("alice").await.unwrap();
    let by_email = cache.get_user_by_email("alice@example.com").await.unwrap();
    assert_eq!(by_name.id, user.id);
    assert_eq!(by_email.id, user.id);
    assert_eq!(store.by_id.load(Ordering::SeqCst), 0);
    cache.close();
}

#[tokio::test]
async fn test_token_lookup_always_reaches_the_store() {
    let store = Arc::new(CountingStore::new());
    let cache = UserStoreCache::new(store.clone(), options());

    cache.create_user(new_user("alice", 1)).await.unwrap();
    for _ in 0..3 {
        cache.get_user_by_protected_token(&[1u8; 32]).await.unwrap();
    }
    assert_eq!(store.by_token.load(Ordering::SeqCst), 3);
    cache.close();
}

#[tokio::test]
async fn test_rotation_is_visible_immediately() {
    let store = Arc::new(CountingStore::new());
    let cache = UserStoreCache::new(store.clone(), options());

    let user = cache.create_user(new_user("alice", 1)).await.unwrap();
    // Warm every cache path first.
    cache.get_user_by_protected_token(&[1u8; 32]).await.unwrap();

    cache.rotate_user_token(user.id, vec![2u8; 32]).await.unwrap();
    assert!(cache.get_user_by_protected_token(&[1u8; 32]).await.is_err());
    assert!(cache.get_user_by_protected_token(&[2u8; 32]).await.is_ok());
    cache.close();
}

#[tokio::test]
async fn test_delete_invalidates_all_three_caches() {
    let store = Arc::new(CountingStore::new());
    let cache = UserStoreCache::new(store.clone(), options());

    let user = cache.create_user(new_user("alice", 1)).await.unwrap();
    cache.get_user(user.id).await.unwrap();
    cache.get_user_by_name("alice").await.unwrap();

    cache.delete_user(user.id).await.unwrap();
    assert!(cache.get_user(user.id).await.is_err());
    assert!(cache.get_user_by_name("alice").await.is_err());
    assert!(cache.get_user_by_email("alice@example.com").await.is_err());
    cache.close();
}

#[tokio::test]
async fn test_email_change_drops_the_old_alias() {
    let store = Arc::new(CountingStore::new());
    let cache = UserStoreCache::new(store.clone(), options());

    let user = cache.create_user(new_user("alice", 1)).await.unwrap();
    cache.get_user_by_email("alice@example.com").await.unwrap();

    cache
        .update_user(
            user.id,
            UserUpdate {
                email: Some("new@example.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(cache.get_user_by_email("alice@example.com").await.is_err());
    let updated = cache.get_user_by_email("new@example.com").await.unwrap();
    assert_eq!(updated.id, user.id);
    cache.close();
}
