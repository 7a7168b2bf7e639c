//! Store traits: the persistence seam.
//!
//! All lookups observe live rows only; soft-deleted tombstones are
//! invisible except to uniqueness accounting (a deleted user's name may be
//! reused). Listings page in ascending id order: `after` is an exclusive
//! lower bound, `limit` caps the page.

use async_trait::async_trait;
use soph_core::{Error, Id};

use crate::entity::{Check, NewCheck, NewProfile, NewUser, Profile, User};

/// Field updates for a user. `None` leaves the field untouched;
/// `default_profile` uses a second `Option` level so the reference can be
/// cleared as well as changed.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub is_admin: Option<bool>,
    pub default_profile: Option<Option<Id>>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub checks: Option<Vec<Id>>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckUpdate {
    pub name: Option<String>,
    pub profiles: Option<Vec<Id>>,
    pub upstream_services: Option<Vec<String>>,
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn get_user(&self, id: Id) -> Result<User, Error>;
    async fn get_user_by_name(&self, name: &str) -> Result<User, Error>;
    async fn get_user_by_email(&self, email: &str) -> Result<User, Error>;
    /// Lookup by protected (HMAC) token. Decorators must never cache this
    /// path: a revoked token has to miss on the very next request.
    async fn get_user_by_protected_token(&self, protected: &[u8]) -> Result<User, Error>;
    async fn list_users(&self, after: Option<Id>, limit: usize) -> Result<Vec<User>, Error>;
    async fn create_user(&self, new: NewUser) -> Result<User, Error>;
    async fn update_user(&self, id: Id, update: UserUpdate) -> Result<User, Error>;
    async fn delete_user(&self, id: Id) -> Result<(), Error>;
    async fn rotate_user_token(&self, id: Id, protected: Vec<u8>) -> Result<User, Error>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    async fn get_profile(&self, id: Id) -> Result<Profile, Error>;
    async fn get_profile_by_name(&self, name: &str) -> Result<Profile, Error>;
    async fn list_profiles(&self, after: Option<Id>, limit: usize) -> Result<Vec<Profile>, Error>;
    async fn create_profile(&self, new: NewProfile) -> Result<Profile, Error>;
    async fn update_profile(&self, id: Id, update: ProfileUpdate) -> Result<Profile, Error>;
    async fn delete_profile(&self, id: Id) -> Result<(), Error>;
}

#[async_trait]
pub trait CheckStore: Send + Sync + 'static {
    async fn get_check(&self, id: Id) -> Result<Check, Error>;
    async fn get_check_by_name(&self, name: &str) -> Result<Check, Error>;
    async fn list_checks(&self, after: Option<Id>, limit: usize) -> Result<Vec<Check>, Error>;
    async fn create_check(&self, new: NewCheck) -> Result<Check, Error>;
    async fn update_check(&self, id: Id, update: CheckUpdate) -> Result<Check, Error>;
    async fn delete_check(&self, id: Id) -> Result<(), Error>;
}

/// The full persistence surface.
pub trait Store: UserStore + ProfileStore + CheckStore {}

impl<T: UserStore + ProfileStore + CheckStore> Store for T {}

// Shared handles are stores too: the decorators and services hold the
// same backend through `Arc`.

#[async_trait]
impl<T: UserStore + ?Sized> UserStore for std::sync::Arc<T> {
    async fn get_user(&self, id: Id) -> Result<User, Error> {
        (**self).get_user(id).await
    }
    async fn get_user_by_name(&self, name: &str) -> Result<User, Error> {
        (**self).get_user_by_name(name).await
    }
    async fn get_user_by_email(&self, email: &str) -> Result<User, Error> {
        (**self).get_user_by_email(email).await
    }
    async fn get_user_by_protected_token(&self, protected: &[u8]) -> Result<User, Error> {
        (**self).get_user_by_protected_token(protected).await
    }
    async fn list_users(&self, after: Option<Id>, limit: usize) -> Result<Vec<User>, Error> {
        (**self).list_users(after, limit).await
    }
    async fn create_user(&self, new: NewUser) -> Result<User, Error> {
        (**self).create_user(new).await
    }
    async fn update_user(&self, id: Id, update: UserUpdate) -> Result<User, Error> {
        (**self).update_user(id, update).await
    }
    async fn delete_user(&self, id: Id) -> Result<(), Error> {
        (**self).delete_user(id).await
    }
    async fn rotate_user_token(&self, id: Id, protected: Vec<u8>) -> Result<User, Error> {
        (**self).rotate_user_token(id, protected).await
    }
}

#[async_trait]
impl<T: ProfileStore + ?Sized> ProfileStore for std::sync::Arc<T> {
    async fn get_profile(&self, id: Id) -> Result<Profile, Error> {
        (**self).get_profile(id).await
    }
    async fn get_profile_by_name(&self, name: &str) -> Result<Profile, Error> {
        (**self).get_profile_by_name(name).await
    }
    async fn list_profiles(&self, after: Option<Id>, limit: usize) -> Result<Vec<Profile>, Error> {
        (**self).list_profiles(after, limit).await
    }
    async fn create_profile(&self, new: NewProfile) -> Result<Profile, Error> {
        (**self).create_profile(new).await
    }
    async fn update_profile(&self, id: Id, update: ProfileUpdate) -> Result<Profile, Error> {
        (**self).update_profile(id, update).await
    }
    async fn delete_profile(&self, id: Id) -> Result<(), Error> {
        (**self).delete_profile(id).await
    }
}

#[async_trait]
impl<T: CheckStore + ?Sized> CheckStore for std::sync::Arc<T> {
    async fn get_check(&self, id: Id) -> Result<Check, Error> {
        (**self).get_check(id).await
    }
    async fn get_check_by_name(&self, name: &str) -> Result<Check, Error> {
        (**self).get_check_by_name(name).await
    }
    async fn list_checks(&self, after: Option<Id>, limit: usize) -> Result<Vec<Check>, Error> {
        (**self).list_checks(after, limit).await
    }
    async fn create_check(&self, new: NewCheck) -> Result<Check, Error> {
        (**self).create_check(new).await
    }
    async fn update_check(&self, id: Id, update: CheckUpdate) -> Result<Check, Error> {
        (**self).update_check(id, update).await
    }
    async fn delete_check(&self, id: Id) -> Result<(), Error> {
        (**self).delete_check(id).await
    }
}
