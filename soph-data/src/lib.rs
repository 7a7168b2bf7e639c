//! Entity records and store backends.
//!
//! Entities are immutable records with soft delete: mutation writes a new
//! version of the row, deletion stamps `deleted_at` and retains the
//! tombstone. Lookups only ever see live rows.
//!
//! The store traits are the persistence seam. [`PgStore`] is the
//! production backend; [`MemoryStore`] implements the same traits over
//! ordered in-memory maps and backs the test suites and development mode.

mod entity;
mod memory;
mod postgres;
mod store;

pub use entity::{Check, NewCheck, NewProfile, NewUser, Profile, User};
pub use memory::MemoryStore;
pub use postgres::{DatabaseOptions, PgStore};
pub use store::{CheckStore, CheckUpdate, ProfileStore, ProfileUpdate, Store, UserStore, UserUpdate};
