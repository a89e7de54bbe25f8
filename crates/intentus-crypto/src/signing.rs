use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

use crate::canonical::sha256_hex;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("key file {path}: {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidEncoding(String),

    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    #[error("signature verification failed for key {0}")]
    VerificationFailed(String),
}

/// Ed25519 signer for WAL entries.
///
/// The key id is the first 16 hex characters of SHA-256 over the raw
/// public key, which lets verifiers look keys up without distributing the
/// private material.
#[derive(Debug)]
pub struct WalSigner {
    key: SigningKey,
    key_id: String,
}

impl WalSigner {
    pub fn new(key: SigningKey) -> Self {
        let key_id = key_id_for(&key.verifying_key());
        Self { key, key_id }
    }

    /// Generate a fresh key pair. Test and bootstrap use only; production
    /// keys come from a key file.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self::new(SigningKey::generate(&mut rng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(bytes))
    }

    /// Load a signer from a file holding the 32-byte secret key as hex.
    pub fn load(path: &Path) -> Result<Self, SigningError> {
        let text = std::fs::read_to_string(path).map_err(|source| SigningError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        let raw = hex::decode(text.trim())
            .map_err(|e| SigningError::InvalidKey(format!("not hex: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| SigningError::InvalidKey("expected 32 bytes of key material".into()))?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign raw bytes; returns the 64-byte signature base64-encoded, the
    /// form stored in WAL entries.
    pub fn sign(&self, data: &[u8]) -> String {
        let signature: Signature = self.key.sign(data);
        BASE64.encode(signature.to_bytes())
    }
}

fn key_id_for(key: &VerifyingKey) -> String {
    let digest = sha256_hex(key.as_bytes());
    digest[..16].to_string()
}

/// Offline registry of verification keys, addressed by key id.
#[derive(Default)]
pub struct KeyRegistry {
    keys: HashMap<String, VerifyingKey>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key: VerifyingKey) {
        self.keys.insert(key_id_for(&key), key);
    }

    pub fn add_from_signer(&mut self, signer: &WalSigner) {
        self.add_key(signer.verifying_key());
    }

    /// Load a verification key from a file holding 32 hex-encoded bytes.
    pub fn add_from_file(&mut self, path: &Path) -> Result<String, SigningError> {
        let text = std::fs::read_to_string(path).map_err(|source| SigningError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        let raw = hex::decode(text.trim())
            .map_err(|e| SigningError::InvalidKey(format!("not hex: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| SigningError::InvalidKey("expected 32 bytes of key material".into()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let id = key_id_for(&key);
        self.keys.insert(id.clone(), key);
        Ok(id)
    }

    pub fn has_key(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.keys().map(String::as_str).collect()
    }

    /// Verify a base64 signature over `data` made by `key_id`.
    pub fn verify(&self, data: &[u8], signature_b64: &str, key_id: &str) -> Result<(), SigningError> {
        let key = self
            .keys
            .get(key_id)
            .ok_or_else(|| SigningError::UnknownKey(key_id.to_string()))?;
        let raw = BASE64
            .decode(signature_b64)
            .map_err(|e| SigningError::InvalidEncoding(e.to_string()))?;
        let bytes: [u8; 64] = raw
            .try_into()
            .map_err(|_| SigningError::InvalidEncoding("expected 64 signature bytes".into()))?;
        let signature = Signature::from_bytes(&bytes);
        key.verify(data, &signature)
            .map_err(|_| SigningError::VerificationFailed(key_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let signer = WalSigner::from_bytes(&[42u8; 32]);
        let mut registry = KeyRegistry::new();
        registry.add_from_signer(&signer);

        let signature = signer.sign(b"entry-hash");
        registry
            .verify(b"entry-hash", &signature, signer.key_id())
            .unwrap();
    }

    #[test]
    fn key_id_is_16_hex_chars_and_deterministic() {
        let a = WalSigner::from_bytes(&[42u8; 32]);
        let b = WalSigner::from_bytes(&[42u8; 32]);
        assert_eq!(a.key_id(), b.key_id());
        assert_eq!(a.key_id().len(), 16);
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signer = WalSigner::from_bytes(&[7u8; 32]);
        let mut registry = KeyRegistry::new();
        registry.add_from_signer(&signer);

        let signature = signer.sign(b"original");
        let err = registry
            .verify(b"tampered", &signature, signer.key_id())
            .unwrap_err();
        assert!(matches!(err, SigningError::VerificationFailed(_)));
    }

    #[test]
    fn wrong_key_is_reported_as_unknown() {
        let signer = WalSigner::from_bytes(&[9u8; 32]);
        let registry = KeyRegistry::new();
        let signature = signer.sign(b"data");
        let err = registry
            .verify(b"data", &signature, signer.key_id())
            .unwrap_err();
        assert!(matches!(err, SigningError::UnknownKey(_)));
    }

    #[test]
    fn signatures_from_distinct_keys_do_not_cross_verify() {
        let key_a = WalSigner::from_bytes(&[42u8; 32]);
        let key_b = WalSigner::from_bytes(&[99u8; 32]);
        let mut registry = KeyRegistry::new();
        registry.add_from_signer(&key_a);
        registry.add_from_signer(&key_b);

        let signature = key_a.sign(b"data");
        assert!(registry.verify(b"data", &signature, key_b.key_id()).is_err());
    }
}
