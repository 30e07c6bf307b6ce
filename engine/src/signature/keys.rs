//! Trusted signing keys
//!
//! Verifying keys are looked up by the `keyId` a signature manifest declares.
//! One key is embedded at compile time via build.rs; operators add more
//! through `[[security.trusted_keys]]`.

use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use sdk::errors::HostError;
use std::collections::HashMap;

/// Key ID of the embedded signing key
pub const EMBEDDED_KEY_ID: &str = "7e4d0c6a708866e7";

const EMBEDDED_PUBLIC_KEY: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/signing_public_key.bin"));

/// Why a signature did not verify
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    UnknownKey(String),
    MalformedSignature,
    Mismatch,
}

/// Set of verifying keys keyed by key ID
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys {
    keys: HashMap<String, VerifyingKey>,
}

impl TrustedKeys {
    /// Empty key set
    pub fn new() -> Self {
        Self::default()
    }

    /// Key set holding the embedded key, unless the build embedded the placeholder
    pub fn with_embedded() -> Self {
        let mut keys = Self::new();

        if EMBEDDED_PUBLIC_KEY.iter().all(|&b| b == 0) {
            tracing::debug!("No embedded signing key in this build");
            return keys;
        }

        match parse_verifying_key(EMBEDDED_PUBLIC_KEY) {
            Ok(key) => keys.insert(EMBEDDED_KEY_ID, key),
            Err(e) => tracing::error!("Embedded signing key is unusable: {}", e),
        }

        keys
    }

    pub fn insert(&mut self, id: impl Into<String>, key: VerifyingKey) {
        self.keys.insert(id.into(), key);
    }

    /// Add a hex-encoded public key
    ///
    /// # Errors
    ///
    /// Returns `HostError::Config` if the hex is malformed, the key is not 32
    /// bytes or the bytes are not a valid Ed25519 point.
    pub fn insert_hex(&mut self, id: &str, public_key_hex: &str) -> Result<(), HostError> {
        if id.trim().is_empty() {
            return Err(HostError::Config("Trusted key id must not be empty".to_string()));
        }

        let bytes = hex::decode(public_key_hex.trim()).map_err(|e| {
            HostError::Config(format!("Trusted key '{}' is not valid hex: {}", id, e))
        })?;

        let key = parse_verifying_key(&bytes)
            .map_err(|e| HostError::Config(format!("Trusted key '{}': {}", id, e)))?;

        self.insert(id.trim(), key);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&VerifyingKey> {
        self.keys.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify an `ed25519:<hex>` signature over `message` with the key `key_id`
    pub fn verify(&self, key_id: &str, message: &[u8], signature: &str) -> Result<(), VerifyError> {
        let key = self
            .get(key_id)
            .ok_or_else(|| VerifyError::UnknownKey(key_id.to_string()))?;

        let signature = parse_signature(signature).ok_or(VerifyError::MalformedSignature)?;

        key.verify(message, &signature)
            .map_err(|_| VerifyError::Mismatch)
    }
}

fn parse_verifying_key(bytes: &[u8]) -> Result<VerifyingKey, String> {
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
        format!(
            "expected {} bytes, got {}",
            PUBLIC_KEY_LENGTH,
            bytes.len()
        )
    })?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| format!("invalid Ed25519 key: {}", e))
}

/// Parse a signature string in format "ed25519:hex_string"
fn parse_signature(sig_str: &str) -> Option<Signature> {
    let sig_str = sig_str.trim();
    let hex = sig_str.strip_prefix("ed25519:").unwrap_or(sig_str);

    let bytes = hex::decode(hex).ok()?;
    let sig_bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().ok()?;

    Some(Signature::from_bytes(&sig_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn keys_with(id: &str, key: &SigningKey) -> TrustedKeys {
        let mut keys = TrustedKeys::new();
        keys.insert(id, key.verifying_key());
        keys
    }

    #[test]
    fn test_verify_accepts_matching_signature() {
        let key = signing_key();
        let sig = format!("ed25519:{}", hex::encode(key.sign(b"payload").to_bytes()));

        assert_eq!(keys_with("k1", &key).verify("k1", b"payload", &sig), Ok(()));
    }

    #[test]
    fn test_verify_rejects_other_message() {
        let key = signing_key();
        let sig = format!("ed25519:{}", hex::encode(key.sign(b"payload").to_bytes()));

        assert_eq!(
            keys_with("k1", &key).verify("k1", b"payload!", &sig),
            Err(VerifyError::Mismatch)
        );
    }

    #[test]
    fn test_verify_unknown_key() {
        let key = signing_key();
        let sig = hex::encode(key.sign(b"payload").to_bytes());

        assert_eq!(
            keys_with("k1", &key).verify("k2", b"payload", &sig),
            Err(VerifyError::UnknownKey("k2".to_string()))
        );
    }

    #[test]
    fn test_verify_malformed_signature() {
        let key = signing_key();
        assert_eq!(
            keys_with("k1", &key).verify("k1", b"payload", "ed25519:zz"),
            Err(VerifyError::MalformedSignature)
        );
        assert_eq!(
            keys_with("k1", &key).verify("k1", b"payload", "ed25519:abcd"),
            Err(VerifyError::MalformedSignature)
        );
    }

    #[test]
    fn test_insert_hex() {
        let key = signing_key();
        let mut keys = TrustedKeys::new();
        keys.insert_hex("k1", &hex::encode(key.verifying_key().to_bytes()))
            .unwrap();
        assert!(keys.contains("k1"));

        assert!(keys.insert_hex("k2", "not-hex").is_err());
        assert!(keys.insert_hex("k3", "abcd").is_err());
        assert!(keys.insert_hex("", "abcd").is_err());
        assert_eq!(keys.len(), 1);
    }
}
