//! Core vocabulary shared by every Sophrosyne crate.
//!
//! This crate carries no I/O: the error taxonomy, XID identifiers, the
//! pagination cursor codec, the entity/principal vocabulary used by
//! authorization, and the structured validation report.

pub mod cursor;
pub mod entity;
pub mod error;
pub mod id;
pub mod validation;

mod context;

pub use context::{Principal, RequestContext};
pub use cursor::Cursor;
pub use entity::{Entity, EntityRef, EntityType};
pub use error::{Error, ErrorKind};
pub use id::Id;
pub use validation::{FieldError, ValidationReport};
