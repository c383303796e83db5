use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

/// A published JSON Web Key Set: the identity provider's current signing keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not valid JSON or doesn't match the expected JWKS shape.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    /// Check that every key carries a key id and valid RSA parameters.
    ///
    /// An empty key set is accepted: verification simply fails closed until a
    /// refresh delivers usable keys.
    ///
    /// # Errors
    ///
    /// Returns an error for the first key that cannot be used for verification.
    pub fn validate(&self) -> Result<(), super::jwt::Error> {
        for key in &self.keys {
            if key.kid.trim().is_empty() {
                return Err(super::jwt::Error::KeyParse);
            }
            key.to_rsa_public_key()?;
        }
        Ok(())
    }

    /// Build a single-key JWKS from an RSA public key (PEM or DER).
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed.
    pub fn from_rsa_public_key_pem_or_der(
        pem_or_der: &[u8],
        kid: impl Into<String>,
    ) -> Result<Self, super::jwt::Error> {
        let jwk = Jwk::from_rsa_public_key(&decode_public_key(pem_or_der)?, kid);
        Ok(Self { keys: vec![jwk] })
    }

    /// Build a single-key JWKS from an RSA private key (PEM or DER), deriving
    /// the public half. Used by tests and local tooling.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed.
    pub fn from_rsa_private_key_pem_or_der(
        private_key_pem_or_der: &[u8],
        kid: impl Into<String>,
    ) -> Result<Self, super::jwt::Error> {
        let private_key = decode_private_key(private_key_pem_or_der)?;
        let jwk = Jwk::from_rsa_public_key(&RsaPublicKey::from(&private_key), kid);
        Ok(Self { keys: vec![jwk] })
    }
}

/// One RSA signing key from the provider's key set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl Jwk {
    /// Build a JWK from an `RsaPublicKey`.
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid: kid.into(),
            n: Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be()),
            e: Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be()),
        }
    }

    /// Convert this JWK back to an `RsaPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base64url values cannot be decoded or the RSA key is invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, super::jwt::Error> {
        let n = Base64UrlUnpadded::decode_vec(&self.n).map_err(|_| super::jwt::Error::Base64)?;
        let e = Base64UrlUnpadded::decode_vec(&self.e).map_err(|_| super::jwt::Error::Base64)?;
        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(super::jwt::Error::Rsa)
    }
}

pub(super) fn decode_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey, super::jwt::Error> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| super::jwt::Error::KeyParse)?;
        return RsaPrivateKey::from_pkcs8_pem(s)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(s))
            .map_err(|_| super::jwt::Error::KeyParse);
    }
    RsaPrivateKey::from_pkcs8_der(pem_or_der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(pem_or_der))
        .map_err(|_| super::jwt::Error::KeyParse)
}

fn decode_public_key(pem_or_der: &[u8]) -> Result<RsaPublicKey, super::jwt::Error> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| super::jwt::Error::KeyParse)?;
        return RsaPublicKey::from_public_key_pem(s)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(s))
            .map_err(|_| super::jwt::Error::KeyParse);
    }
    RsaPublicKey::from_public_key_der(pem_or_der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(pem_or_der))
        .map_err(|_| super::jwt::Error::KeyParse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::jwt::tests::TEST_PRIVATE_KEY_PEM;

    #[test]
    fn from_private_key_and_lookup() -> Result<(), crate::assertion::Error> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        assert_eq!(jwks.keys.len(), 1);
        assert!(jwks.find_by_kid("k1").is_some());
        assert!(jwks.find_by_kid("k2").is_none());
        jwks.validate()?;
        Ok(())
    }

    #[test]
    fn json_round_trip() -> Result<(), crate::assertion::Error> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        let json = serde_json::to_string(&jwks).map_err(crate::assertion::Error::Json)?;
        let parsed = Jwks::from_json(&json).map_err(crate::assertion::Error::Json)?;
        assert_eq!(parsed, jwks);
        Ok(())
    }

    #[test]
    fn validate_rejects_blank_kid() -> Result<(), crate::assertion::Error> {
        let mut jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        jwks.keys[0].kid = " ".to_string();
        assert!(jwks.validate().is_err());
        Ok(())
    }

    #[test]
    fn validate_rejects_garbage_modulus() -> Result<(), crate::assertion::Error> {
        let mut jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        jwks.keys[0].n = "!!!".to_string();
        assert!(jwks.validate().is_err());
        Ok(())
    }

    #[test]
    fn empty_keyset_is_valid_but_useless() {
        let jwks = Jwks { keys: Vec::new() };
        assert!(jwks.validate().is_ok());
        assert!(jwks.find_by_kid("any").is_none());
    }
}
