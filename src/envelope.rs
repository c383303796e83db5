//! Envelope encryption for guest records.
//!
//! Every encryption call generates a fresh 256-bit data key (DEK) and a fresh
//! 96-bit IV, seals the record with ChaCha20-Poly1305, and wraps the DEK
//! under the deployment root key (KEK) with AES-KW. The `(table, record_id,
//! purpose)` context string is authenticated as AAD, so a ciphertext moved to
//! any other record or purpose fails integrity verification even under the
//! correct root key.
//!
//! Decryption failures are deliberately opaque: wrong key, tampered bytes and
//! mismatched context all collapse into a single [`IntegrityError`] so the
//! failure mode cannot be used as an oracle.

use aes_kw::KekAes256;
use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use zeroize::{ZeroizeOnDrop, Zeroizing};

const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 12;
/// AES-KW output for a 32-byte key: 32 + 8 bytes of integrity block.
const WRAPPED_DEK_SIZE: usize = 40;

/// Opaque decryption failure. Callers must treat the record as unreadable;
/// the cause (wrong key, tampering, wrong context) is intentionally not
/// distinguished.
#[derive(Debug, Error)]
#[error("record unreadable")]
pub struct IntegrityError;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("root key must decode to exactly 32 bytes of base64")]
    RootKeyFormat,
    #[error("failed to serialize record plaintext")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to generate key material")]
    KeyMaterial,
    #[error("record encryption failed")]
    Seal,
    #[error("data key wrapping failed")]
    Wrap,
}

/// Deployment root key (KEK). Loaded once per process, used only to wrap and
/// unwrap per-record data keys, wiped from memory on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct RootKey {
    key: [u8; KEY_SIZE],
}

impl RootKey {
    /// Build a root key from a base64-encoded 256-bit secret.
    ///
    /// # Errors
    /// Returns [`EnvelopeError::RootKeyFormat`] if the input is not base64 or
    /// does not decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, EnvelopeError> {
        let decoded =
            Base64::decode_vec(encoded.trim()).map_err(|_| EnvelopeError::RootKeyFormat)?;
        let key: [u8; KEY_SIZE] = decoded
            .try_into()
            .map_err(|_| EnvelopeError::RootKeyFormat)?;
        Ok(Self { key })
    }

    #[must_use]
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Generate a fresh random root key, base64-encoded (operator bootstrap).
    #[must_use]
    pub fn generate() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Base64::encode_string(&key)
    }

    fn kek(&self) -> KekAes256 {
        KekAes256::from(self.key)
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey").field("key", &"***").finish()
    }
}

/// Serializable envelope for one encrypted record.
///
/// All binary fields are base64. `aad_hint` is a human-readable echo of the
/// authenticated context, kept for audits; it is never trusted as the
/// decryption context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub ciphertext: String,
    pub iv: String,
    pub dek_wrapped: String,
    pub aad_hint: String,
}

fn record_aad(table: &str, record_id: &str, purpose: &str) -> String {
    // Exact string, no trimming or case folding: the caller owns the
    // canonical context.
    format!("{table}:{record_id}:{purpose}")
}

/// Encrypt a JSON value bound to the `(table, record_id, purpose)` context.
///
/// # Errors
/// Returns an error if serialization, key generation, sealing, or key
/// wrapping fails. Never silently degrades to plaintext.
pub fn encrypt_record(
    kek: &RootKey,
    value: &Value,
    table: &str,
    record_id: &str,
    purpose: &str,
) -> Result<EncryptedRecord, EnvelopeError> {
    let plaintext = serde_json::to_vec(value).map_err(EnvelopeError::Serialize)?;

    let mut dek = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng
        .try_fill_bytes(&mut *dek)
        .map_err(|_| EnvelopeError::KeyMaterial)?;

    let mut iv = [0u8; IV_SIZE];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|_| EnvelopeError::KeyMaterial)?;

    let aad = record_aad(table, record_id, purpose);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&*dek));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| EnvelopeError::Seal)?;

    let mut wrapped = [0u8; WRAPPED_DEK_SIZE];
    kek.kek()
        .wrap(&*dek, &mut wrapped)
        .map_err(|_| EnvelopeError::Wrap)?;

    Ok(EncryptedRecord {
        ciphertext: Base64::encode_string(&ciphertext),
        iv: Base64::encode_string(&iv),
        dek_wrapped: Base64::encode_string(&wrapped),
        aad_hint: aad,
    })
}

/// Decrypt a record previously sealed for the same context.
///
/// The unwrapped data key exists only inside this call.
///
/// # Errors
/// Returns [`IntegrityError`] for every failure: malformed encoding, wrong
/// root key, tampered ciphertext/IV/wrapped key, or a context that does not
/// match the one the record was sealed for.
pub fn decrypt_record(
    record: &EncryptedRecord,
    kek: &RootKey,
    table: &str,
    record_id: &str,
    purpose: &str,
) -> Result<Value, IntegrityError> {
    let ciphertext = Base64::decode_vec(&record.ciphertext).map_err(|_| IntegrityError)?;
    let iv = Base64::decode_vec(&record.iv).map_err(|_| IntegrityError)?;
    let wrapped = Base64::decode_vec(&record.dek_wrapped).map_err(|_| IntegrityError)?;

    if iv.len() != IV_SIZE || wrapped.len() != WRAPPED_DEK_SIZE {
        return Err(IntegrityError);
    }

    let mut dek = Zeroizing::new([0u8; KEY_SIZE]);
    kek.kek()
        .unwrap(&wrapped, &mut *dek)
        .map_err(|_| IntegrityError)?;

    let aad = record_aad(table, record_id, purpose);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&*dek));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| IntegrityError)?,
    );

    serde_json::from_slice(&plaintext).map_err(|_| IntegrityError)
}
