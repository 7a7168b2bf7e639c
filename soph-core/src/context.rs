//! Per-request context.
//!
//! The authenticator resolves the bearer token to a user and attaches a
//! [`Principal`] projection of it here; everything downstream (services,
//! oracle, dispatcher) reads the principal from the context instead of
//! re-resolving it.

use crate::entity::{Entity, EntityType};
use crate::error::Error;
use crate::id::Id;

/// The authenticated caller, as seen by authorization and the services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Id,
    pub name: String,
    pub is_admin: bool,
    pub default_profile: Option<Id>,
}

impl Entity for Principal {
    fn entity_type(&self) -> EntityType {
        EntityType::User
    }

    fn entity_id(&self) -> Id {
        self.id
    }
}

/// Context threaded through every service operation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    principal: Option<Principal>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// The principal, or the constant `unauthenticated` failure.
    pub fn require_principal(&self) -> Result<&Principal, Error> {
        self.principal.as_ref().ok_or_else(Error::invalid_token)
    }
}
