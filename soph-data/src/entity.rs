//! The three entity records.
//!
//! Profile↔Check is a relation over ids, never embedded values: a
//! `Profile` carries the ordered ids of its checks, a `Check` the ids of
//! the profiles referencing it, and the stores keep the two views of the
//! relation consistent.

use chrono::{DateTime, Utc};
use soph_core::{Entity, EntityType, Id, Principal};

/// An API consumer. The raw bearer token is never stored, only its
/// HMAC-protected form.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub protected_token: Vec<u8>,
    pub is_admin: bool,
    pub default_profile: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// The projection the authenticator attaches to the request context.
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            name: self.name.clone(),
            is_admin: self.is_admin,
            default_profile: self.default_profile,
        }
    }
}

impl Entity for User {
    fn entity_type(&self) -> EntityType {
        EntityType::User
    }

    fn entity_id(&self) -> Id {
        self.id
    }
}

/// An ordered set of checks run as one moderation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: Id,
    pub name: String,
    /// Check ids in execution-declaration order.
    pub checks: Vec<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity for Profile {
    fn entity_type(&self) -> EntityType {
        EntityType::Profile
    }

    fn entity_id(&self) -> Id {
        self.id
    }
}

/// An external moderation service registered under a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub id: Id,
    pub name: String,
    /// Profiles referencing this check (back side of the relation).
    pub profiles: Vec<Id>,
    /// Provider URLs. The dispatcher dials the first; the rest are
    /// reserved for failover.
    pub upstream_services: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity for Check {
    fn entity_type(&self) -> EntityType {
        EntityType::Check
    }

    fn entity_id(&self) -> Id {
        self.id
    }
}

/// Creation payload for a user. Id and timestamps are assigned by the
/// service; the protected token comes from the token protector.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub protected_token: Vec<u8>,
    pub is_admin: bool,
    pub default_profile: Option<Id>,
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub name: String,
    pub checks: Vec<Id>,
}

#[derive(Debug, Clone)]
pub struct NewCheck {
    pub name: String,
    pub profiles: Vec<Id>,
    pub upstream_services: Vec<String>,
}
