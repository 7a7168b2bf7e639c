//! Cache decorators over the store traits.
//!
//! Each decorator owns a TTL cache keyed by id plus alias caches mapping
//! names (and, for users, emails) to ids. The alias caches never hold
//! entity values; they delegate to the id cache, so one invalidation
//! point covers every lookup path.
//!
//! Token lookups are the deliberate exception: `get_user_by_protected_token`
//! always reaches the primary store, so a rotated or deleted token stops
//! authenticating immediately. The result is then back-filled into the id
//! cache where it is safe to reuse.

use std::time::Duration;

use async_trait::async_trait;
use soph_cache::TtlCache;
use soph_core::{Error, Id};
use soph_data::{
    Check, CheckStore, CheckUpdate, NewCheck, NewProfile, NewUser, Profile, ProfileStore,
    ProfileUpdate, User, UserStore, UserUpdate,
};

/// `services.*.cache.*` knobs.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

// ── Users ──────────────────────────────────────────────────────────────

/// Caching decorator for a [`UserStore`].
pub struct UserStoreCache<S> {
    inner: S,
    by_id: TtlCache<User>,
    name_to_id: TtlCache<Id>,
    email_to_id: TtlCache<Id>,
}

impl<S: UserStore> UserStoreCache<S> {
    pub fn new(inner: S, options: CacheOptions) -> Self {
        Self {
            inner,
            by_id: TtlCache::new(options.ttl, options.cleanup_interval),
            name_to_id: TtlCache::new(options.ttl, options.cleanup_interval),
            email_to_id: TtlCache::new(options.ttl, options.cleanup_interval),
        }
    }

    /// Stop the sweepers. The service owning this decorator calls it on
    /// shutdown.
    pub fn close(&self) {
        self.by_id.close();
        self.name_to_id.close();
        self.email_to_id.close();
    }

    async fn fill(&self, user: &User) {
        self.by_id.set(user.id.to_string(), user.clone()).await;
        self.name_to_id.set(user.name.clone(), user.id).await;
        self.email_to_id.set(user.email.clone(), user.id).await;
    }

    async fn invalidate(&self, user: &User) {
        self.by_id.delete(&user.id.to_string()).await;
        self.name_to_id.delete(&user.name).await;
        self.email_to_id.delete(&user.email).await;
    }
}

#[async_trait]
impl<S: UserStore> UserStore for UserStoreCache<S> {
    async fn get_user(&self, id: Id) -> Result<User, Error> {
        if let Some(user) = self.by_id.get(&id.to_string()).await {
            return Ok(user);
        }
        let user = self.inner.get_user(id).await?;
        self.fill(&user).await;
        Ok(user)
    }

    async fn get_user_by_name(&self, name: &str) -> Result<User, Error> {
        if let Some(id) = self.name_to_id.get(name).await {
            return self.get_user(id).await;
        }
        let user = self.inner.get_user_by_name(name).await?;
        self.fill(&user).await;
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, Error> {
        if let Some(id) = self.email_to_id.get(email).await {
            return self.get_user(id).await;
        }
        let user = self.inner.get_user_by_email(email).await?;
        self.fill(&user).await;
        Ok(user)
    }

    /// Never served from cache. Revocation correctness beats latency.
    async fn get_user_by_protected_token(&self, protected: &[u8]) -> Result<User, Error> {
        let user = self.inner.get_user_by_protected_token(protected).await?;
        self.fill(&user).await;
        Ok(user)
    }

    async fn list_users(&self, after: Option<Id>, limit: usize) -> Result<Vec<User>, Error> {
        self.inner.list_users(after, limit).await
    }

    async fn create_user(&self, new: NewUser) -> Result<User, Error> {
        let user = self.inner.create_user(new).await?;
        self.fill(&user).await;
        Ok(user)
    }

    async fn update_user(&self, id: Id, update: UserUpdate) -> Result<User, Error> {
        // Load first so stale aliases (an email that just changed) are
        // dropped rather than left pointing at the fresh row.
        if let Ok(previous) = self.inner.get_user(id).await {
            self.invalidate(&previous).await;
        }
        let user = self.inner.update_user(id, update).await?;
        self.fill(&user).await;
        Ok(user)
    }

    async fn delete_user(&self, id: Id) -> Result<(), Error> {
        let user = self.inner.get_user(id).await?;
        self.inner.delete_user(id).await?;
        self.invalidate(&user).await;
        Ok(())
    }

    async fn rotate_user_token(&self, id: Id, protected: Vec<u8>) -> Result<User, Error> {
        let user = self.inner.rotate_user_token(id, protected).await?;
        self.fill(&user).await;
        Ok(user)
    }
}

// ── Profiles ───────────────────────────────────────────────────────────

/// Caching decorator for a [`ProfileStore`].
pub struct ProfileStoreCache<S> {
    inner: S,
    by_id: TtlCache<Profile>,
    name_to_id: TtlCache<Id>,
}

impl<S: ProfileStore> ProfileStoreCache<S> {
    pub fn new(inner: S, options: CacheOptions) -> Self {
        Self {
            inner,
            by_id: TtlCache::new(options.ttl, options.cleanup_interval),
            name_to_id: TtlCache::new(options.ttl, options.cleanup_interval),
        }
    }

    pub fn close(&self) {
        self.by_id.close();
        self.name_to_id.close();
    }

    async fn fill(&self, profile: &Profile) {
        self.by_id
            .set(profile.id.to_string(), profile.clone())
            .await;
        self.name_to_id.set(profile.name.clone(), profile.id).await;
    }

    async fn invalidate(&self, profile: &Profile) {
        self.by_id.delete(&profile.id.to_string()).await;
        self.name_to_id.delete(&profile.name).await;
    }
}

#[async_trait]
impl<S: ProfileStore> ProfileStore for ProfileStoreCache<S> {
    async fn get_profile(&self, id: Id) -> Result<Profile, Error> {
        if let Some(profile) = self.by_id.get(&id.to_string()).await {
            return Ok(profile);
        }
        let profile = self.inner.get_profile(id).await?;
        self.fill(&profile).await;
        Ok(profile)
    }

    async fn get_profile_by_name(&self, name: &str) -> Result<Profile, Error> {
        if let Some(id) = self.name_to_id.get(name).await {
            return self.get_profile(id).await;
        }
        let profile = self.inner.get_profile_by_name(name).await?;
        self.fill(&profile).await;
        Ok(profile)
    }

    async fn list_profiles(&self, after: Option<Id>, limit: usize) -> Result<Vec<Profile>, Error> {
        self.inner.list_profiles(after, limit).await
    }

    async fn create_profile(&self, new: NewProfile) -> Result<Profile, Error> {
        let profile = self.inner.create_profile(new).await?;
        self.fill(&profile).await;
        Ok(profile)
    }

    async fn update_profile(&self, id: Id, update: ProfileUpdate) -> Result<Profile, Error> {
        if let Ok(previous) = self.inner.get_profile(id).await {
            self.invalidate(&previous).await;
        }
        let profile = self.inner.update_profile(id, update).await?;
        self.fill(&profile).await;
        Ok(profile)
    }

    async fn delete_profile(&self, id: Id) -> Result<(), Error> {
        let profile = self.inner.get_profile(id).await?;
        self.inner.delete_profile(id).await?;
        self.invalidate(&profile).await;
        Ok(())
    }
}

// ── Checks ─────────────────────────────────────────────────────────────

/// Caching decorator for a [`CheckStore`].
pub struct CheckStoreCache<S> {
    inner: S,
    by_id: TtlCache<Check>,
    name_to_id: TtlCache<Id>,
}

impl<S: CheckStore> CheckStoreCache<S> {
    pub fn new(inner: S, options: CacheOptions) -> Self {
        Self {
            inner,
            by_id: TtlCache::new(options.ttl, options.cleanup_interval),
            name_to_id: TtlCache::new(options.ttl, options.cleanup_interval),
        }
    }

    pub fn close(&self) {
        self.by_id.close();
        self.name_to_id.close();
    }

    async fn fill(&self, check: &Check) {
        self.by_id.set(check.id.to_string(), check.clone()).await;
        self.name_to_id.set(check.name.clone(), check.id).await;
    }

    async fn invalidate(&self, check: &Check) {
        self.by_id.delete(&check.id.to_string()).await;
        self.name_to_id.delete(&check.name).await;
    }
}

#[async_trait]
impl<S: CheckStore> CheckStore for CheckStoreCache<S> {
    async fn get_check(&self, id: Id) -> Result<Check, Error> {
        if let Some(check) = self.by_id.get(&id.to_string()).await {
            return Ok(check);
        }
        let check = self.inner.get_check(id).await?;
        self.fill(&check).await;
        Ok(check)
    }

    async fn get_check_by_name(&self, name: &str) -> Result<Check, Error> {
        if let Some(id) = self.name_to_id.get(name).await {
            return self.get_check(id).await;
        }
        let check = self.inner.get_check_by_name(name).await?;
        self.fill(&check).await;
        Ok(check)
    }

    async fn list_checks(&self, after: Option<Id>, limit: usize) -> Result<Vec<Check>, Error> {
        self.inner.list_checks(after, limit).await
    }

    async fn create_check(&self, new: NewCheck) -> Result<Check, Error> {
        let check = self.inner.create_check(new).await?;
        self.fill(&check).await;
        Ok(check)
    }

    async fn update_check(&self, id: Id, update: CheckUpdate) -> Result<Check, Error> {
        if let Ok(previous) = self.inner.get_check(id).await {
            self.invalidate(&previous).await;
        }
        let check = self.inner.update_check(id, update).await?;
        self.fill(&check).await;
        Ok(check)
    }

    async fn delete_check(&self, id: Id) -> Result<(), Error> {
        let check = self.inner.get_check(id).await?;
        self.inner.delete_check(id).await?;
        self.invalidate(&check).await;
        Ok(())
    }
}
