//! Bearer tokens and their HMAC-protected form.
//!
//! A raw token is 64 random bytes, surfaced exactly once (user creation and
//! rotation). The store only ever sees `HMAC_SHA256(key = site key,
//! msg = token ‖ salt)`, which is 32 bytes, deterministic, and
//! non-reversible. The
//! authenticator compares protected forms; a raw token is never persisted
//! and never recoverable.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::SecurityError;

/// Raw bearer tokens are 64 bytes.
pub const RAW_TOKEN_LEN: usize = 64;
/// Protected tokens are the HMAC-SHA256 output width.
pub const PROTECTED_TOKEN_LEN: usize = 32;
/// The site key must be exactly 64 bytes.
pub const SITE_KEY_LEN: usize = 64;
/// The salt must be exactly 32 bytes.
pub const SALT_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Generate a fresh 64-byte raw token.
pub fn new_token(rng: &mut (impl RngCore + ?Sized)) -> [u8; RAW_TOKEN_LEN] {
    let mut token = [0u8; RAW_TOKEN_LEN];
    rng.fill_bytes(&mut token);
    token
}

/// Computes the protected (storable) form of raw tokens.
///
/// Site key and salt are validated length-exact at construction and are
/// immutable afterwards; a deployment that cannot satisfy that refuses to
/// start.
#[derive(Clone)]
pub struct TokenProtector {
    site_key: [u8; SITE_KEY_LEN],
    salt: [u8; SALT_LEN],
}

impl TokenProtector {
    pub fn new(site_key: &[u8], salt: &[u8]) -> Result<Self, SecurityError> {
        let site_key: [u8; SITE_KEY_LEN] =
            site_key
                .try_into()
                .map_err(|_| SecurityError::InvalidSiteKey {
                    expected: SITE_KEY_LEN,
                    actual: site_key.len(),
                })?;
        let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| SecurityError::InvalidSalt {
            expected: SALT_LEN,
            actual: salt.len(),
        })?;
        Ok(Self { site_key, salt })
    }

    /// `HMAC_SHA256(key = site key, msg = token ‖ salt)`.
    pub fn protect(&self, token: &[u8]) -> [u8; PROTECTED_TOKEN_LEN] {
        let mut mac = HmacSha256::new_from_slice(&self.site_key)
            .expect("HMAC accepts any key length");
        mac.update(token);
        mac.update(&self.salt);
        mac.finalize().into_bytes().into()
    }
}

impl std::fmt::Debug for TokenProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of debug output.
        f.debug_struct("TokenProtector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protector() -> TokenProtector {
        TokenProtector::new(&[7u8; SITE_KEY_LEN], &[3u8; SALT_LEN]).unwrap()
    }

    #[test]
    fn protect_is_deterministic_and_32_bytes() {
        let p = protector();
        let token = [1u8; RAW_TOKEN_LEN];
        let a = p.protect(&token);
        let b = p.protect(&token);
        assert_eq!(a, b);
        assert_eq!(a.len(), PROTECTED_TOKEN_LEN);
    }

    #[test]
    fn different_tokens_protect_differently() {
        let p = protector();
        assert_ne!(p.protect(&[1u8; RAW_TOKEN_LEN]), p.protect(&[2u8; RAW_TOKEN_LEN]));
    }

    #[test]
    fn salt_contributes_to_the_mac() {
        let token = [1u8; RAW_TOKEN_LEN];
        let a = TokenProtector::new(&[7u8; SITE_KEY_LEN], &[3u8; SALT_LEN]).unwrap();
        let b = TokenProtector::new(&[7u8; SITE_KEY_LEN], &[4u8; SALT_LEN]).unwrap();
        assert_ne!(a.protect(&token), b.protect(&token));
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        assert!(TokenProtector::new(&[0u8; 63], &[0u8; SALT_LEN]).is_err());
        assert!(TokenProtector::new(&[0u8; SITE_KEY_LEN], &[0u8; 31]).is_err());
    }

    #[test]
    fn new_token_is_64_bytes_and_random() {
        let mut rng = rand::rngs::OsRng;
        let a = new_token(&mut rng);
        let b = new_token(&mut rng);
        assert_eq!(a.len(), RAW_TOKEN_LEN);
        assert_ne!(a, b);
    }
}
