//! TLS provisioning.
//!
//! Builds the server context for the ingress listener and the shared client
//! context used when dialling upstream check providers. Both pin the
//! protocol floor at TLS 1.3.
//!
//! Key material selection follows the configuration: an empty `key_path`
//! means "generate a key of the configured type"; an empty
//! `certificate_path` means "issue a self-signed certificate for the
//! advertised host", valid for one year.

use std::io::BufReader;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use tokio_rustls::TlsConnector;

use crate::error::SecurityError;

/// Key algorithms accepted by `security.tls.keyType`.
///
/// `EC-P224` and `EC-P521` parse but cannot be provisioned: the ring
/// provider signs with neither curve, and refusing at startup beats
/// failing on the first handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa4096,
    EcP224,
    EcP256,
    EcP384,
    EcP521,
    Ed25519,
}

impl FromStr for KeyType {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RSA-4096" => Ok(KeyType::Rsa4096),
            "EC-P224" => Ok(KeyType::EcP224),
            "EC-P256" => Ok(KeyType::EcP256),
            "EC-P384" => Ok(KeyType::EcP384),
            "EC-P521" => Ok(KeyType::EcP521),
            "ED25519" => Ok(KeyType::Ed25519),
            other => Err(SecurityError::UnsupportedKeyType(other.to_string())),
        }
    }
}

/// Inputs for building the server TLS context.
#[derive(Debug, Clone)]
pub struct ServerTlsOptions {
    pub key_type: KeyType,
    /// PEM certificate chain. `None` issues a self-signed certificate.
    pub certificate_path: Option<PathBuf>,
    /// PKCS#8-or-EC PEM private key. `None` generates a fresh key.
    pub key_path: Option<PathBuf>,
    /// CN and first SAN of a self-signed certificate.
    pub advertised_host: String,
    /// Additional SANs (DNS names or IP addresses).
    pub additional_sans: Vec<String>,
}

impl ServerTlsOptions {
    /// Assemble the rustls server configuration: TLS 1.3 floor, ALPN for
    /// HTTP/2 (gRPC) and HTTP/1.1.
    pub fn build(&self) -> Result<rustls::ServerConfig, SecurityError> {
        let (key_der, key_pem) = self.key_material()?;
        let cert_chain = self.certificate_chain(&key_pem)?;

        let mut config =
            rustls::ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
                .with_no_client_auth()
                .with_single_cert(cert_chain, key_der)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }

    /// The private key DER plus its PEM rendering (the PEM is what rcgen
    /// signs with if a certificate has to be issued).
    fn key_material(&self) -> Result<(PrivateKeyDer<'static>, String), SecurityError> {
        match &self.key_path {
            Some(path) => {
                let pem = std::fs::read_to_string(path)
                    .map_err(|e| SecurityError::PemUnreadable(format!("{}: {e}", path.display())))?;
                let key = rustls_pemfile::private_key(&mut BufReader::new(pem.as_bytes()))
                    .map_err(|e| SecurityError::PemUnreadable(e.to_string()))?
                    .ok_or_else(|| {
                        SecurityError::WrongPemBlock(format!(
                            "{}: no private key block",
                            path.display()
                        ))
                    })?;
                Ok((key, pem))
            }
            None => generate_key(self.key_type),
        }
    }

    fn certificate_chain(
        &self,
        key_pem: &str,
    ) -> Result<Vec<CertificateDer<'static>>, SecurityError> {
        match &self.certificate_path {
            Some(path) => {
                let pem = std::fs::read(path)
                    .map_err(|e| SecurityError::PemUnreadable(format!("{}: {e}", path.display())))?;
                let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
                    .collect::<Result<_, _>>()
                    .map_err(|e| SecurityError::PemUnreadable(e.to_string()))?;
                if certs.is_empty() {
                    return Err(SecurityError::WrongPemBlock(format!(
                        "{}: no certificate block",
                        path.display()
                    )));
                }
                Ok(certs)
            }
            None => {
                let cert = self.issue_self_signed(key_pem)?;
                Ok(vec![cert])
            }
        }
    }

    /// Self-signed, one year, CN + first SAN = advertised host, key usage
    /// digitalSignature (plus keyEncipherment for RSA), EKU serverAuth.
    fn issue_self_signed(&self, key_pem: &str) -> Result<CertificateDer<'static>, SecurityError> {
        let key_pair = rcgen::KeyPair::from_pem(key_pem)
            .map_err(|e| SecurityError::WrongPemBlock(e.to_string()))?;

        let mut sans = vec![self.advertised_host.clone()];
        sans.extend(self.additional_sans.iter().cloned());

        let mut params = rcgen::CertificateParams::new(sans)?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, &self.advertised_host);

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(365);

        params
            .key_usages
            .push(rcgen::KeyUsagePurpose::DigitalSignature);
        if self.key_type == KeyType::Rsa4096 {
            params
                .key_usages
                .push(rcgen::KeyUsagePurpose::KeyEncipherment);
        }
        params
            .extended_key_usages
            .push(rcgen::ExtendedKeyUsagePurpose::ServerAuth);

        let cert = params.self_signed(&key_pair)?;
        Ok(cert.der().clone())
    }
}

fn generate_key(key_type: KeyType) -> Result<(PrivateKeyDer<'static>, String), SecurityError> {
    match key_type {
        KeyType::Rsa4096 => {
            let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 4096)
                .map_err(|e| SecurityError::KeyGeneration(e.to_string()))?;
            let der = key
                .to_pkcs8_der()
                .map_err(|e| SecurityError::KeyGeneration(e.to_string()))?;
            let pem = key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| SecurityError::KeyGeneration(e.to_string()))?;
            Ok((
                PrivateKeyDer::from(PrivatePkcs8KeyDer::from(der.as_bytes().to_vec())),
                pem.to_string(),
            ))
        }
        KeyType::EcP256 => generate_rcgen_key(&rcgen::PKCS_ECDSA_P256_SHA256),
        KeyType::EcP384 => generate_rcgen_key(&rcgen::PKCS_ECDSA_P384_SHA384),
        KeyType::Ed25519 => generate_rcgen_key(&rcgen::PKCS_ED25519),
        KeyType::EcP224 => Err(SecurityError::UnsupportedKeyType("EC-P224".to_string())),
        KeyType::EcP521 => Err(SecurityError::UnsupportedKeyType("EC-P521".to_string())),
    }
}

fn generate_rcgen_key(
    alg: &'static rcgen::SignatureAlgorithm,
) -> Result<(PrivateKeyDer<'static>, String), SecurityError> {
    let key_pair = rcgen::KeyPair::generate_for(alg)
        .map_err(|e| SecurityError::KeyGeneration(e.to_string()))?;
    let der = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((der, key_pair.serialize_pem()))
}

// ── Client context ─────────────────────────────────────────────────────

/// The shared TLS client context used for outbound provider connections.
///
/// Cheap to clone; all clones share one `rustls::ClientConfig`.
#[derive(Clone)]
pub struct ClientTls {
    config: Arc<rustls::ClientConfig>,
}

impl ClientTls {
    /// Webpki roots, TLS 1.3 floor, ALPN h2. `insecure_skip_verify`
    /// installs a verifier that accepts anything and is honoured only when
    /// explicitly set in configuration.
    pub fn new(insecure_skip_verify: bool) -> Result<Self, SecurityError> {
        let builder =
            rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13]);

        let mut config = if insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureVerifier::new()))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        };
        config.alpn_protocols = vec![b"h2".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(Arc::clone(&self.config))
    }

    pub fn config(&self) -> Arc<rustls::ClientConfig> {
        Arc::clone(&self.config)
    }
}

/// Accepts any server certificate. Development only.
#[derive(Debug)]
struct InsecureVerifier {
    schemes: Vec<rustls::SignatureScheme>,
}

impl InsecureVerifier {
    fn new() -> Self {
        let provider = rustls::crypto::ring::default_provider();
        Self {
            schemes: provider
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.schemes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_parses_case_insensitively() {
        assert_eq!("rsa-4096".parse::<KeyType>().unwrap(), KeyType::Rsa4096);
        assert_eq!("ec-p384".parse::<KeyType>().unwrap(), KeyType::EcP384);
        assert_eq!("ED25519".parse::<KeyType>().unwrap(), KeyType::Ed25519);
        assert!("dsa".parse::<KeyType>().is_err());
    }

    #[test]
    fn unsupported_curves_fail_generation() {
        assert!(matches!(
            generate_key(KeyType::EcP224),
            Err(SecurityError::UnsupportedKeyType(_))
        ));
        assert!(matches!(
            generate_key(KeyType::EcP521),
            Err(SecurityError::UnsupportedKeyType(_))
        ));
    }
}
