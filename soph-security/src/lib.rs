//! Security primitives: bearer-token protection and TLS provisioning.
//!
//! Two independent concerns live here because they share a lifecycle: both
//! are configured once at startup from `security.*` options and are
//! immutable for the life of the deployment:
//!
//! - [`token`]: 64-byte bearer tokens and their HMAC-SHA256 protected form,
//!   which is the only form ever persisted.
//! - [`tls`]: server and client TLS contexts with a TLS 1.3 floor,
//!   self-signed issuance when no key/certificate material is supplied.

pub mod error;
pub mod tls;
pub mod token;

pub use error::SecurityError;
pub use tls::{ClientTls, KeyType, ServerTlsOptions};
pub use token::{TokenProtector, PROTECTED_TOKEN_LEN, RAW_TOKEN_LEN, SALT_LEN, SITE_KEY_LEN};
