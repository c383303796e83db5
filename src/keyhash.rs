//! Keyed hashing for emails and opaque tokens.
//!
//! Emails and raw credentials are never stored: lookups go through an
//! HMAC-SHA256 digest under a deployment secret. Emails are case-insensitive
//! lookup keys and are normalized before hashing; tokens are opaque random
//! strings where any transformation would create ambiguity, so their raw
//! bytes are hashed as-is.

use anyhow::{Context, Result};
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

const SECRET_SIZE: usize = 32;
const TOKEN_SIZE: usize = 32;

/// Deterministic, secret-keyed hasher for lookup digests.
///
/// Cheap to clone; the secret is wiped from memory on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct KeyedHasher {
    secret: [u8; SECRET_SIZE],
}

impl KeyedHasher {
    /// Build a hasher from a base64-encoded 256-bit secret.
    ///
    /// # Errors
    /// Returns an error if the input is not base64 or does not decode to
    /// exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Base64::decode_vec(encoded.trim()).context("hash secret is not base64")?;
        let secret: [u8; SECRET_SIZE] = decoded
            .try_into()
            .map_err(|_| anyhow::anyhow!("hash secret must decode to exactly 32 bytes"))?;
        Ok(Self { secret })
    }

    #[must_use]
    pub fn from_bytes(secret: [u8; SECRET_SIZE]) -> Self {
        Self { secret }
    }

    /// Generate a fresh random secret, base64-encoded (operator bootstrap).
    #[must_use]
    pub fn generate_secret() -> String {
        let mut secret = [0u8; SECRET_SIZE];
        OsRng.fill_bytes(&mut secret);
        Base64::encode_string(&secret)
    }

    /// Hash an email for lookup. Emails are case-insensitive keys, so the
    /// input is trimmed and lowercased before hashing.
    #[must_use]
    pub fn hash_email(&self, email: &str) -> String {
        self.digest(email.trim().to_lowercase().as_bytes())
    }

    /// Hash an opaque token (magic link, session identifier). No
    /// normalization: tokens are case- and whitespace-sensitive.
    #[must_use]
    pub fn hash_token(&self, token: &str) -> String {
        self.digest(token.as_bytes())
    }

    fn digest(&self, input: &[u8]) -> String {
        let mut mac: Hmac<Sha256> =
            Mac::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(input);
        Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for KeyedHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedHasher").field("secret", &"***").finish()
    }
}

/// Generate a 256-bit random token, URL-safe base64 encoded.
///
/// Used once per magic link or per session; only the keyed hash of the
/// result is ever persisted.
///
/// # Errors
/// Returns an error if the OS entropy source fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_SIZE];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn hasher() -> KeyedHasher {
        KeyedHasher::from_bytes([7u8; 32])
    }

    #[test]
    fn hash_email_normalizes_case_and_whitespace() {
        let hasher = hasher();
        assert_eq!(
            hasher.hash_email("User@Example.com "),
            hasher.hash_email("user@example.com")
        );
        assert_eq!(
            hasher.hash_email("  ALICE@EXAMPLE.COM"),
            hasher.hash_email("alice@example.com")
        );
    }

    #[test]
    fn hash_token_is_exact() {
        let hasher = hasher();
        assert_ne!(hasher.hash_token("abc"), hasher.hash_token("ABC"));
        assert_ne!(hasher.hash_token("abc"), hasher.hash_token("abc "));
    }

    #[test]
    fn hash_is_deterministic() {
        let hasher = hasher();
        assert_eq!(hasher.hash_token("token"), hasher.hash_token("token"));
        assert_eq!(
            hasher.hash_email("a@example.com"),
            hasher.hash_email("a@example.com")
        );
    }

    #[test]
    fn different_secret_flips_many_bits() {
        // Changing the secret should produce an unrelated digest, not a
        // near-miss: expect a Hamming distance well above chance-of-equality.
        let first = KeyedHasher::from_bytes([1u8; 32]).hash_token("token");
        let second = KeyedHasher::from_bytes([2u8; 32]).hash_token("token");

        let first = Base64UrlUnpadded::decode_vec(&first).expect("digest decodes");
        let second = Base64UrlUnpadded::decode_vec(&second).expect("digest decodes");
        assert_eq!(first.len(), 32);
        assert_eq!(second.len(), 32);

        let differing_bits: u32 = first
            .iter()
            .zip(second.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert!(
            differing_bits > 64,
            "expected > 64 of 256 bits to differ, got {differing_bits}"
        );
    }

    #[test]
    fn from_base64_round_trip() {
        let encoded = KeyedHasher::generate_secret();
        assert!(KeyedHasher::from_base64(&encoded).is_ok());
        assert!(KeyedHasher::from_base64("not-base64!").is_err());
        assert!(KeyedHasher::from_base64("c2hvcnQ=").is_err());
    }

    #[test]
    fn generate_token_entropy_and_shape() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let token = generate_token().expect("token generation");
            assert_eq!(token.len(), 43);
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "token charset must be URL-safe: {token}"
            );
            assert!(seen.insert(token), "token collision");
        }
    }

    #[test]
    fn debug_redacts_secret() {
        let output = format!("{:?}", hasher());
        assert!(output.contains("***"));
        assert!(!output.contains('7'));
    }
}
