//! XID identifiers.
//!
//! Every entity id is a 12-byte value rendered as 20 base32-hex characters
//! (`[0-9a-v]{20}`). The raw layout is 4 bytes of big-endian UNIX seconds,
//! 3 bytes of per-process machine id, 2 bytes of pid, and a 3-byte counter
//! seeded randomly at startup. Ids sort lexicographically in creation
//! order, which is what the cursor-paged listings rely on.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

const RAW_LEN: usize = 12;
const ENCODED_LEN: usize = 20;
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// A 12-byte, base32-hex-rendered identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; RAW_LEN]);

impl Id {
    /// Generate a fresh id for the current instant.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let machine = machine_id();
        let pid = std::process::id() as u16;
        let count = counter().fetch_add(1, Ordering::SeqCst);

        let mut raw = [0u8; RAW_LEN];
        raw[0..4].copy_from_slice(&secs.to_be_bytes());
        raw[4..7].copy_from_slice(machine);
        raw[7..9].copy_from_slice(&pid.to_be_bytes());
        raw[9] = (count >> 16) as u8;
        raw[10] = (count >> 8) as u8;
        raw[11] = count as u8;
        Id(raw)
    }

    pub fn from_bytes(raw: [u8; RAW_LEN]) -> Self {
        Id(raw)
    }

    pub fn as_bytes(&self) -> &[u8; RAW_LEN] {
        &self.0
    }

    /// Whether `s` is a canonical 20-character base32-hex id.
    pub fn is_valid(s: &str) -> bool {
        s.parse::<Id>().is_ok()
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [0u8; ENCODED_LEN];
        encode_base32_hex(&self.0, &mut out);
        // Alphabet output is always ASCII.
        f.write_str(std::str::from_utf8(&out).expect("base32 output is ascii"))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENCODED_LEN {
            return Err(Error::new(crate::error::ErrorKind::Validation, format!("malformed id: {s:?}")));
        }
        let mut raw = [0u8; RAW_LEN];
        decode_base32_hex(s.as_bytes(), &mut raw)
            .ok_or_else(|| Error::new(crate::error::ErrorKind::Validation, format!("malformed id: {s:?}")))?;
        // Reject non-canonical spellings (trailing padding bits set).
        let id = Id(raw);
        if id.to_string() != s {
            return Err(Error::new(crate::error::ErrorKind::Validation, format!("malformed id: {s:?}")));
        }
        Ok(id)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn encode_base32_hex(raw: &[u8; RAW_LEN], out: &mut [u8; ENCODED_LEN]) {
    let mut buf: u32 = 0;
    let mut bits: u32 = 0;
    let mut pos = 0;
    for &byte in raw {
        buf = (buf << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out[pos] = ALPHABET[((buf >> bits) & 0x1f) as usize];
            pos += 1;
        }
    }
    // 96 bits leave a 1-bit tail; it becomes the final character's high bit.
    if bits > 0 {
        out[pos] = ALPHABET[((buf << (5 - bits)) & 0x1f) as usize];
    }
}

fn decode_base32_hex(encoded: &[u8], raw: &mut [u8; RAW_LEN]) -> Option<()> {
    let mut buf: u32 = 0;
    let mut bits: u32 = 0;
    let mut pos = 0;
    for &ch in encoded {
        let val = match ch {
            b'0'..=b'9' => ch - b'0',
            b'a'..=b'v' => ch - b'a' + 10,
            _ => return None,
        };
        buf = (buf << 5) | val as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            if pos == RAW_LEN {
                return None;
            }
            raw[pos] = (buf >> bits) as u8;
            pos += 1;
        }
    }
    (pos == RAW_LEN).then_some(())
}

fn machine_id() -> &'static [u8; 3] {
    static MACHINE_ID: OnceLock<[u8; 3]> = OnceLock::new();
    MACHINE_ID.get_or_init(|| {
        let mut bytes = [0u8; 3];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes
    })
}

fn counter() -> &'static AtomicU32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER.get_or_init(|| AtomicU32::new(rand::rngs::OsRng.next_u32() & 0x00ff_ffff))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_twenty_base32_chars() {
        let id = Id::new();
        let s = id.to_string();
        assert_eq!(s.len(), 20);
        assert!(s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'v').contains(&b)));
    }

    #[test]
    fn round_trips_through_string() {
        let id = Id::new();
        let parsed: Id = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_bad_lengths_and_alphabet() {
        assert!(!Id::is_valid(""));
        assert!(!Id::is_valid("short"));
        assert!(!Id::is_valid("zzzzzzzzzzzzzzzzzzzz"));
        assert!(!Id::is_valid("0123456789ABCDEFGHIJ"));
    }

    #[test]
    fn rejects_non_canonical_tail() {
        // The last character only carries one meaningful bit; anything that
        // sets the padding bits must not round-trip.
        let id = Id::new();
        let mut s = id.to_string();
        s.pop();
        s.push('v');
        if s != id.to_string() {
            assert!(!Id::is_valid(&s));
        }
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = Id::new();
        let b = Id::new();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }
}
