//! Error types for the security layer.

use std::fmt;

/// Errors raised while building the token protector or TLS contexts.
///
/// All of these are startup failures: the process refuses to serve rather
/// than run with degraded security material.
#[derive(Debug)]
pub enum SecurityError {
    /// Site key is not exactly the required length.
    InvalidSiteKey { expected: usize, actual: usize },
    /// Salt is not exactly the required length.
    InvalidSalt { expected: usize, actual: usize },
    /// The configured key type cannot be generated or signed with.
    UnsupportedKeyType(String),
    /// A PEM file could not be read.
    PemUnreadable(String),
    /// A PEM file was readable but held no usable block of the expected type.
    WrongPemBlock(String),
    /// Key generation failed.
    KeyGeneration(String),
    /// Certificate issuance failed.
    Certificate(String),
    /// rustls rejected the assembled configuration.
    Tls(rustls::Error),
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityError::InvalidSiteKey { expected, actual } => {
                write!(f, "site key must be exactly {expected} bytes, got {actual}")
            }
            SecurityError::InvalidSalt { expected, actual } => {
                write!(f, "salt must be exactly {expected} bytes, got {actual}")
            }
            SecurityError::UnsupportedKeyType(kind) => {
                write!(f, "unsupported key type: {kind}")
            }
            SecurityError::PemUnreadable(msg) => write!(f, "unreadable PEM: {msg}"),
            SecurityError::WrongPemBlock(msg) => write!(f, "wrong PEM block: {msg}"),
            SecurityError::KeyGeneration(msg) => write!(f, "key generation failed: {msg}"),
            SecurityError::Certificate(msg) => write!(f, "certificate issuance failed: {msg}"),
            SecurityError::Tls(err) => write!(f, "TLS configuration rejected: {err}"),
        }
    }
}

impl std::error::Error for SecurityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SecurityError::Tls(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rustls::Error> for SecurityError {
    fn from(err: rustls::Error) -> Self {
        SecurityError::Tls(err)
    }
}

impl From<rcgen::Error> for SecurityError {
    fn from(err: rcgen::Error) -> Self {
        SecurityError::Certificate(err.to_string())
    }
}
