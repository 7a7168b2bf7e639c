//! In-memory store.
//!
//! Ordered maps behind one async `RwLock`, so every operation is atomic
//! across the entity tables and the Profile↔Check relation. Backs the test
//! suites and development mode; semantics mirror [`PgStore`] exactly.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soph_core::{Error, Id};
use tokio::sync::RwLock;

use crate::entity::{Check, NewCheck, NewProfile, NewUser, Profile, User};
use crate::store::{CheckStore, CheckUpdate, ProfileStore, ProfileUpdate, UserStore, UserUpdate};

#[derive(Debug, Clone)]
struct ProfileRow {
    id: Id,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CheckRow {
    id: Id,
    name: String,
    upstream_services: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<Id, User>,
    profiles: BTreeMap<Id, ProfileRow>,
    checks: BTreeMap<Id, CheckRow>,
    /// The Profile↔Check relation. Vec order is the per-profile check
    /// order.
    profile_checks: Vec<(Id, Id)>,
}

impl Inner {
    fn assemble_profile(&self, row: &ProfileRow) -> Profile {
        Profile {
            id: row.id,
            name: row.name.clone(),
            checks: self
                .profile_checks
                .iter()
                .filter(|(p, _)| *p == row.id)
                .map(|(_, c)| *c)
                .collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }

    fn assemble_check(&self, row: &CheckRow) -> Check {
        Check {
            id: row.id,
            name: row.name.clone(),
            profiles: self
                .profile_checks
                .iter()
                .filter(|(_, c)| *c == row.id)
                .map(|(p, _)| *p)
                .collect(),
            upstream_services: row.upstream_services.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }

    fn live_profile(&self, id: Id) -> Option<&ProfileRow> {
        self.profiles.get(&id).filter(|r| r.deleted_at.is_none())
    }

    fn live_check(&self, id: Id) -> Option<&CheckRow> {
        self.checks.get(&id).filter(|r| r.deleted_at.is_none())
    }

    fn require_checks(&self, ids: &[Id]) -> Result<(), Error> {
        for id in ids {
            if self.live_check(*id).is_none() {
                return Err(Error::not_found(format!("check {id} not found")));
            }
        }
        Ok(())
    }

    fn require_profiles(&self, ids: &[Id]) -> Result<(), Error> {
        for id in ids {
            if self.live_profile(*id).is_none() {
                return Err(Error::not_found(format!("profile {id} not found")));
            }
        }
        Ok(())
    }
}

/// Thread-safe in-memory implementation of the store traits.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paged<'a, T: Clone + 'a>(
    map: &'a BTreeMap<Id, T>,
    after: Option<Id>,
    limit: usize,
    is_live: impl Fn(&T) -> bool + 'a,
) -> impl Iterator<Item = &'a T> {
    let lower = match after {
        Some(id) => Bound::Excluded(id),
        None => Bound::Unbounded,
    };
    map.range((lower, Bound::Unbounded))
        .map(|(_, v)| v)
        .filter(move |v| is_live(v))
        .take(limit)
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: Id) -> Result<User, Error> {
        let inner = self.inner.read().await;
        inner
            .users
            .get(&id)
            .filter(|u| u.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| Error::not_found("user not found"))
    }

    async fn get_user_by_name(&self, name: &str) -> Result<User, Error> {
        let inner = self.inner.read().await;
        inner
            .users
            .values()
            .find(|u| u.deleted_at.is_none() && u.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found("user not found"))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, Error> {
        let inner = self.inner.read().await;
        inner
            .users
            .values()
            .find(|u| u.deleted_at.is_none() && u.email == email)
            .cloned()
            .ok_or_else(|| Error::not_found("user not found"))
    }

    async fn get_user_by_protected_token(&self, protected: &[u8]) -> Result<User, Error> {
        let inner = self.inner.read().await;
        inner
            .users
            .values()
            .find(|u| u.deleted_at.is_none() && u.protected_token == protected)
            .cloned()
            .ok_or_else(|| Error::not_found("user not found"))
    }

    async fn list_users(&self, after: Option<Id>, limit: usize) -> Result<Vec<User>, Error> {
        let inner = self.inner.read().await;
        Ok(paged(&inner.users, after, limit, |u| u.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn create_user(&self, new: NewUser) -> Result<User, Error> {
        let mut inner = self.inner.write().await;
        for existing in inner.users.values().filter(|u| u.deleted_at.is_none()) {
            if existing.name == new.name {
                return Err(Error::conflict("user name already exists"));
            }
            if existing.email == new.email {
                return Err(Error::conflict("user email already exists"));
            }
            if existing.protected_token == new.protected_token {
                return Err(Error::conflict("token collision"));
            }
        }
        if let Some(profile) = new.default_profile {
            if inner.live_profile(profile).is_none() {
                return Err(Error::not_found(format!("profile {profile} not found")));
            }
        }

        let now = Utc::now();
        let user = User {
            id: Id::new(),
            name: new.name,
            email: new.email,
            protected_token: new.protected_token,
            is_admin: new.is_admin,
            default_profile: new.default_profile,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: Id, update: UserUpdate) -> Result<User, Error> {
        let mut inner = self.inner.write().await;

        if let Some(email) = &update.email {
            if inner
                .users
                .values()
                .any(|u| u.deleted_at.is_none() && u.id != id && &u.email == email)
            {
                return Err(Error::conflict("user email already exists"));
            }
        }
        if let Some(Some(profile)) = update.default_profile {
            if inner.live_profile(profile).is_none() {
                return Err(Error::not_found(format!("profile {profile} not found")));
            }
        }

        let user = inner
            .users
            .get_mut(&id)
            .filter(|u| u.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("user not found"))?;
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(is_admin) = update.is_admin {
            user.is_admin = is_admin;
        }
        if let Some(default_profile) = update.default_profile {
            user.default_profile = default_profile;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, id: Id) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .filter(|u| u.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("user not found"))?;
        user.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn rotate_user_token(&self, id: Id, protected: Vec<u8>) -> Result<User, Error> {
        let mut inner = self.inner.write().await;
        if inner
            .users
            .values()
            .any(|u| u.deleted_at.is_none() && u.id != id && u.protected_token == protected)
        {
            return Err(Error::conflict("token collision"));
        }
        let user = inner
            .users
            .get_mut(&id)
            .filter(|u| u.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("user not found"))?;
        user.protected_token = protected;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, id: Id) -> Result<Profile, Error> {
        let inner = self.inner.read().await;
        inner
            .live_profile(id)
            .map(|row| inner.assemble_profile(row))
            .ok_or_else(|| Error::not_found("profile not found"))
    }

    async fn get_profile_by_name(&self, name: &str) -> Result<Profile, Error> {
        let inner = self.inner.read().await;
        inner
            .profiles
            .values()
            .find(|r| r.deleted_at.is_none() && r.name == name)
            .map(|row| inner.assemble_profile(row))
            .ok_or_else(|| Error::not_found("profile not found"))
    }

    async fn list_profiles(&self, after: Option<Id>, limit: usize) -> Result<Vec<Profile>, Error> {
        let inner = self.inner.read().await;
        let rows: Vec<ProfileRow> =
            paged(&inner.profiles, after, limit, |r| r.deleted_at.is_none())
                .cloned()
                .collect();
        Ok(rows.iter().map(|r| inner.assemble_profile(r)).collect())
    }

    async fn create_profile(&self, new: NewProfile) -> Result<Profile, Error> {
        let mut inner = self.inner.write().await;
        if inner
            .profiles
            .values()
            .any(|r| r.deleted_at.is_none() && r.name == new.name)
        {
            return Err(Error::conflict("profile name already exists"));
        }
        inner.require_checks(&new.checks)?;

        let now = Utc::now();
        let row = ProfileRow {
            id: Id::new(),
            name: new.name,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        for check in &new.checks {
            inner.profile_checks.push((row.id, *check));
        }
        inner.profiles.insert(row.id, row.clone());
        Ok(inner.assemble_profile(&row))
    }

    async fn update_profile(&self, id: Id, update: ProfileUpdate) -> Result<Profile, Error> {
        let mut inner = self.inner.write().await;
        if let Some(name) = &update.name {
            if inner
                .profiles
                .values()
                .any(|r| r.deleted_at.is_none() && r.id != id && &r.name == name)
            {
                return Err(Error::conflict("profile name already exists"));
            }
        }
        if let Some(checks) = &update.checks {
            inner.require_checks(checks)?;
        }

        let row = inner
            .profiles
            .get_mut(&id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("profile not found"))?;
        if let Some(name) = update.name {
            row.name = name;
        }
        row.updated_at = Utc::now();
        let row = row.clone();

        if let Some(checks) = update.checks {
            inner.profile_checks.retain(|(p, _)| *p != id);
            for check in checks {
                inner.profile_checks.push((id, check));
            }
        }
        Ok(inner.assemble_profile(&row))
    }

    async fn delete_profile(&self, id: Id) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        if inner
            .users
            .values()
            .any(|u| u.deleted_at.is_none() && u.default_profile == Some(id))
        {
            return Err(Error::conflict("profile is referenced as a default profile"));
        }
        let row = inner
            .profiles
            .get_mut(&id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("profile not found"))?;
        row.deleted_at = Some(Utc::now());
        inner.profile_checks.retain(|(p, _)| *p != id);
        Ok(())
    }
}

#[async_trait]
impl CheckStore for MemoryStore {
    async fn get_check(&self, id: Id) -> Result<Check, Error> {
        let inner = self.inner.read().await;
        inner
            .live_check(id)
            .map(|row| inner.assemble_check(row))
            .ok_or_else(|| Error::not_found("check not found"))
    }

    async fn get_check_by_name(&self, name: &str) -> Result<Check, Error> {
        let inner = self.inner.read().await;
        inner
            .checks
            .values()
            .find(|r| r.deleted_at.is_none() && r.name == name)
            .map(|row| inner.assemble_check(row))
            .ok_or_else(|| Error::not_found("check not found"))
    }

    async fn list_checks(&self, after: Option<Id>, limit: usize) -> Result<Vec<Check>, Error> {
        let inner = self.inner.read().await;
        let rows: Vec<CheckRow> = paged(&inner.checks, after, limit, |r| r.deleted_at.is_none())
            .cloned()
            .collect();
        Ok(rows.iter().map(|r| inner.assemble_check(r)).collect())
    }

    async fn create_check(&self, new: NewCheck) -> Result<Check, Error> {
        let mut inner = self.inner.write().await;
        if inner
            .checks
            .values()
            .any(|r| r.deleted_at.is_none() && r.name == new.name)
        {
            return Err(Error::conflict("check name already exists"));
        }
        inner.require_profiles(&new.profiles)?;

        let now = Utc::now();
        let row = CheckRow {
            id: Id::new(),
            name: new.name,
            upstream_services: new.upstream_services,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        for profile in &new.profiles {
            inner.profile_checks.push((*profile, row.id));
        }
        inner.checks.insert(row.id, row.clone());
        Ok(inner.assemble_check(&row))
    }

    async fn update_check(&self, id: Id, update: CheckUpdate) -> Result<Check, Error> {
        let mut inner = self.inner.write().await;
        if let Some(name) = &update.name {
            if inner
                .checks
                .values()
                .any(|r| r.deleted_at.is_none() && r.id != id && &r.name == name)
            {
                return Err(Error::conflict("check name already exists"));
            }
        }
        if let Some(profiles) = &update.profiles {
            inner.require_profiles(profiles)?;
        }

        let row = inner
            .checks
            .get_mut(&id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("check not found"))?;
        if let Some(name) = update.name {
            row.name = name;
        }
        if let Some(upstream_services) = update.upstream_services {
            row.upstream_services = upstream_services;
        }
        row.updated_at = Utc::now();
        let row = row.clone();

        if let Some(profiles) = update.profiles {
            inner.profile_checks.retain(|(_, c)| *c != id);
            for profile in profiles {
                inner.profile_checks.push((profile, id));
            }
        }
        Ok(inner.assemble_check(&row))
    }

    async fn delete_check(&self, id: Id) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        let row = inner
            .checks
            .get_mut(&id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| Error::not_found("check not found"))?;
        row.deleted_at = Some(Utc::now());
        inner.profile_checks.retain(|(_, c)| *c != id);
        Ok(())
    }
}
