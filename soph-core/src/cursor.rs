//! Owner-scoped pagination cursors.
//!
//! A cursor encodes `owner::position` in base64, where both halves are XIDs.
//! The owner is the principal that produced the page; decoding on behalf of
//! anyone else fails, which is what stops cursor forgery across principals.
//! An absent position means end-of-stream and encodes as the empty string.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::Error;
use crate::id::Id;

const SEPARATOR: &str = "::";

/// A position in an ascending-id scan, bound to the principal that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub owner_id: Id,
    /// Id of the last row returned. `None` once the scan is exhausted.
    pub position: Option<Id>,
}

impl Cursor {
    pub fn new(owner_id: Id, position: Option<Id>) -> Self {
        Self { owner_id, position }
    }

    /// A cursor with no position; encodes as the empty string.
    pub fn reset(owner_id: Id) -> Self {
        Self {
            owner_id,
            position: None,
        }
    }

    /// Advance to the given row id.
    pub fn advance(&mut self, position: Id) {
        self.position = Some(position);
    }

    pub fn is_reset(&self) -> bool {
        self.position.is_none()
    }

    /// `base64(owner::position)`, or the empty string at end-of-stream.
    pub fn encode(&self) -> String {
        match self.position {
            Some(position) => {
                BASE64.encode(format!("{}{}{}", self.owner_id, SEPARATOR, position))
            }
            None => String::new(),
        }
    }

    /// Decode a client-supplied cursor. Empty input is not accepted here;
    /// callers treat an empty string as "start from the beginning" before
    /// ever reaching the codec.
    pub fn decode(encoded: &str) -> Result<Self, Error> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|_| Error::invalid_cursor())?;
        let raw = String::from_utf8(raw).map_err(|_| Error::invalid_cursor())?;

        let mut parts = raw.split(SEPARATOR);
        let (owner, position) = match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(position), None) => (owner, position),
            _ => return Err(Error::invalid_cursor()),
        };

        let owner_id: Id = owner.parse().map_err(|_| Error::invalid_cursor())?;
        let position: Id = position.parse().map_err(|_| Error::invalid_cursor())?;
        Ok(Self {
            owner_id,
            position: Some(position),
        })
    }

    /// Decode and require the cursor to belong to `expected_owner`.
    pub fn decode_with_owner(encoded: &str, expected_owner: Id) -> Result<Self, Error> {
        let cursor = Self::decode(encoded)?;
        if cursor.owner_id != expected_owner {
            return Err(Error::invalid_cursor());
        }
        Ok(cursor)
    }
}
