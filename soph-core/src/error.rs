//! Error taxonomy shared across the gateway.
//!
//! Every fallible operation converges on [`Error`]: a kind drawn from the
//! fixed taxonomy, a short stable message safe to put on the wire, and an
//! optional source chain plus field-level detail that stay in the logs.

use std::fmt;

use crate::validation::FieldError;

/// The message returned for every authentication failure.
///
/// Deliberately constant: the wire never reveals whether the token was
/// missing, malformed, or revoked.
pub const INVALID_TOKEN: &str = "invalid token";

/// Classification of a gateway error.
///
/// Each kind maps to exactly one gRPC status code and one JSON-RPC error
/// code; the mapping lives with the transport handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request parameters.
    Validation,
    /// Missing or invalid bearer token.
    Unauthenticated,
    /// The authorization oracle refused the operation.
    PermissionDenied,
    /// Entity lookup miss.
    NotFound,
    /// Uniqueness violation.
    Conflict,
    /// Cursor decode failure or owner mismatch.
    InvalidCursor,
    /// Store failure, panic, or other unexpected condition.
    Internal,
    /// Provider dial/call failure. Absorbed by the dispatcher, never
    /// surfaced to clients.
    UpstreamUnavailable,
}

impl ErrorKind {
    /// Stable short name, used in logs and error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidCursor => "invalid-cursor",
            ErrorKind::Internal => "internal",
            ErrorKind::UpstreamUnavailable => "upstream-unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gateway error: taxonomy kind + stable message.
///
/// The message is what clients see. Detail that could disclose internals
/// (store errors, HMAC failures) travels in `source` and is logged, not
/// serialized.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    fields: Vec<FieldError>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: Vec::new(),
            source: None,
        }
    }

    /// Attach an underlying cause. The cause is logged, never serialized.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn validation(report: crate::validation::ValidationReport) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: "invalid parameters".to_string(),
            fields: report.errors,
            source: None,
        }
    }

    /// The constant-message authentication failure.
    pub fn invalid_token() -> Self {
        Self::new(ErrorKind::Unauthenticated, INVALID_TOKEN)
    }

    pub fn permission_denied() -> Self {
        Self::new(ErrorKind::PermissionDenied, "permission denied")
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, what)
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, what)
    }

    pub fn invalid_cursor() -> Self {
        Self::new(ErrorKind::InvalidCursor, "invalid cursor")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Field-level validation detail. Empty for non-validation kinds.
    pub fn fields(&self) -> &[FieldError] {
        &self.fields
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ErrorKind::PermissionDenied.as_str(), "permission-denied");
        assert_eq!(ErrorKind::InvalidCursor.as_str(), "invalid-cursor");
        assert_eq!(ErrorKind::UpstreamUnavailable.as_str(), "upstream-unavailable");
    }

    #[test]
    fn invalid_token_message_is_constant() {
        let err = Error::invalid_token();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        assert_eq!(err.message(), INVALID_TOKEN);
    }

    #[test]
    fn source_is_chained_not_displayed() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = Error::internal("store failure").with_source(io);
        assert_eq!(err.to_string(), "internal: store failure");
        assert!(err.source().is_some());
    }
}
