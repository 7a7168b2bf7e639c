use soph_core::{Cursor, ErrorKind, Id};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

#[test]
fn test_round_trip() {
    let owner = Id::new();
    let position = Id::new();
    let encoded = Cursor::new(owner, Some(position)).encode();
    let decoded = Cursor::decode(&encoded).unwrap();
    assert_eq!(decoded.owner_id, owner);
    assert_eq!(decoded.position, Some(position));
}

#[test]
fn test_reset_cursor_encodes_empty() {
    let cursor = Cursor::reset(Id::new());
    assert!(cursor.is_reset());
    assert_eq!(cursor.encode(), "");
}

#[test]
fn test_decode_rejects_garbage() {
    for bad in ["", "not base64!!", "aGVsbG8=", "::"] {
        let err = Cursor::decode(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCursor, "input {bad:?}");
    }
}

#[test]
fn test_decode_rejects_extra_parts() {
    let id = Id::new();
    let forged = BASE64.encode(format!("{id}::{id}::{id}"));
    assert!(Cursor::decode(&forged).is_err());
}

#[test]
fn test_decode_rejects_invalid_xids() {
    let forged = BASE64.encode("abc::def");
    assert!(Cursor::decode(&forged).is_err());
}

#[test]
fn test_owner_mismatch_is_rejected() {
    let owner = Id::new();
    let other = Id::new();
    let encoded = Cursor::new(owner, Some(Id::new())).encode();

    assert!(Cursor::decode_with_owner(&encoded, owner).is_ok());
    let err = Cursor::decode_with_owner(&encoded, other).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCursor);
}

#[test]
fn test_advance_moves_position() {
    let owner = Id::new();
    let mut cursor = Cursor::reset(owner);
    let row = Id::new();
    cursor.advance(row);
    assert_eq!(cursor.position, Some(row));
    assert!(!cursor.encode().is_empty());
}
