use std::io::Write;

use soph_security::{KeyType, SecurityError, ServerTlsOptions};

fn options(key_type: KeyType) -> ServerTlsOptions {
    ServerTlsOptions {
        key_type,
        certificate_path: None,
        key_path: None,
        advertised_host: "gateway.example.com".to_string(),
        additional_sans: vec!["localhost".to_string(), "127.0.0.1".to_string()],
    }
}

#[test]
fn test_self_signed_ed25519_context() {
    let config = options(KeyType::Ed25519).build().unwrap();
    assert_eq!(
        config.alpn_protocols,
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    );
}

#[test]
fn test_self_signed_ec_p256_context() {
    assert!(options(KeyType::EcP256).build().is_ok());
}

#[test]
fn test_self_signed_ec_p384_context() {
    assert!(options(KeyType::EcP384).build().is_ok());
}

#[test]
fn test_unsupported_curve_refused_at_build() {
    for key_type in [KeyType::EcP224, KeyType::EcP521] {
        match options(key_type).build() {
            Err(SecurityError::UnsupportedKeyType(_)) => {}
            other => panic!("expected unsupported key type, got {other:?}"),
        }
    }
}

#[test]
fn test_key_loaded_from_pem_file() {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(key_pair.serialize_pem().as_bytes()).unwrap();

    let mut opts = options(KeyType::EcP256);
    opts.key_path = Some(file.path().to_path_buf());
    assert!(opts.build().is_ok());
}

#[test]
fn test_missing_key_file_is_unreadable_pem() {
    let mut opts = options(KeyType::EcP256);
    opts.key_path = Some("/nonexistent/key.pem".into());
    match opts.build() {
        Err(SecurityError::PemUnreadable(_)) => {}
        other => panic!("expected unreadable PEM, got {other:?}"),
    }
}

#[test]
fn test_key_file_without_key_block_is_wrong_block() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n")
        .unwrap();

    let mut opts = options(KeyType::EcP256);
    opts.key_path = Some(file.path().to_path_buf());
    assert!(opts.build().is_err());
}
