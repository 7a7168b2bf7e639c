//! Entity vocabulary shared by the stores and the authorization oracle.

use std::fmt;

use crate::id::Id;

/// The kinds of entity the gateway manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    User,
    Profile,
    Check,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Profile => "profile",
            EntityType::Check => "check",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(type, id)` reference to a concrete entity.
///
/// Cross-entity references are always by id at persistence and
/// authorization boundaries, never by embedded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: Id,
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// Anything that can appear as the resource of an authorization request.
pub trait Entity {
    fn entity_type(&self) -> EntityType;
    fn entity_id(&self) -> Id;

    fn entity_ref(&self) -> EntityRef {
        EntityRef {
            entity_type: self.entity_type(),
            entity_id: self.entity_id(),
        }
    }
}
