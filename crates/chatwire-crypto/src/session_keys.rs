//! Per-session symmetric keys and AEAD operations.
//!
//! One AES-256-GCM key per conversation session, held only in memory for the
//! lifetime of the process. Keys are installed from caller-provided random
//! material (sans-IO: the store never touches an RNG), looked up by session
//! id for every encrypt/decrypt, and zeroized on drop.

use std::collections::HashMap;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Session key size in bytes (AES-256).
pub const SESSION_KEY_SIZE: usize = 32;

/// IV size in bytes (96-bit GCM nonce).
pub const IV_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Output of one encryption: ciphertext with a detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedContent {
    /// Ciphertext without the authentication tag.
    pub ciphertext: Vec<u8>,
    /// The IV used for this encryption.
    pub iv: [u8; IV_SIZE],
    /// Detached GCM authentication tag.
    pub auth_tag: [u8; TAG_SIZE],
}

/// A single session key. Private to the store; raw bytes never escape.
struct SessionKey {
    bytes: [u8; SESSION_KEY_SIZE],
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// In-memory store of per-session AES-256-GCM keys.
///
/// # Invariants
///
/// - At most one key per session id; installation is idempotent.
/// - Raw key bytes are never returned to callers and never persisted.
#[derive(Default)]
pub struct SessionKeyStore {
    keys: HashMap<String, SessionKey>,
}

impl SessionKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self { keys: HashMap::new() }
    }

    /// Install a session key from caller-provided random material.
    ///
    /// Idempotent: a session that already has a key keeps it and the new
    /// material is discarded. All-zero material is rejected - it signals a
    /// broken entropy source, and callers are expected to retry with fresh
    /// randomness.
    ///
    /// # Errors
    ///
    /// - `CryptoError::KeyGeneration` if the material is all zeroes.
    pub fn generate(
        &mut self,
        session_id: &str,
        key_material: [u8; SESSION_KEY_SIZE],
    ) -> Result<(), CryptoError> {
        if self.keys.contains_key(session_id) {
            return Ok(());
        }

        if key_material == [0u8; SESSION_KEY_SIZE] {
            return Err(CryptoError::KeyGeneration {
                reason: "key material is all zeroes".to_string(),
            });
        }

        self.keys.insert(session_id.to_string(), SessionKey { bytes: key_material });
        Ok(())
    }

    /// Whether a key is cached for the session.
    pub fn contains(&self, session_id: &str) -> bool {
        self.keys.contains_key(session_id)
    }

    /// Number of cached session keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no session keys are cached.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Drop the key for a session (session closed).
    pub fn remove(&mut self, session_id: &str) {
        self.keys.remove(session_id);
    }

    /// Raw key bytes for the exchange path. Crate-internal: key material
    /// never crosses the crate boundary.
    pub(crate) fn key_material(&self, session_id: &str) -> Option<&[u8; SESSION_KEY_SIZE]> {
        self.keys.get(session_id).map(|key| &key.bytes)
    }

    /// Install a key received through the exchange path. Same idempotence
    /// as [`Self::generate`]: an existing key wins.
    pub(crate) fn install(
        &mut self,
        session_id: &str,
        key_material: [u8; SESSION_KEY_SIZE],
    ) -> Result<(), CryptoError> {
        self.generate(session_id, key_material)
    }

    /// Encrypt plaintext under the session's key.
    ///
    /// The caller provides a fresh random IV for every call; IVs must never
    /// be reused under the same key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::SessionKeyNotFound` if no key is cached - callers
    ///   generate first.
    pub fn encrypt(
        &self,
        session_id: &str,
        plaintext: &[u8],
        iv: [u8; IV_SIZE],
    ) -> Result<EncryptedContent, CryptoError> {
        let key = self.keys.get(session_id).ok_or_else(|| CryptoError::SessionKeyNotFound {
            session_id: session_id.to_string(),
        })?;

        let cipher = Aes256Gcm::new((&key.bytes).into());

        let Ok(mut sealed) = cipher.encrypt(Nonce::from_slice(&iv), plaintext) else {
            unreachable!("AES-256-GCM encryption cannot fail with valid inputs");
        };

        // aes-gcm appends the tag; detach it so the envelope can carry it
        // as separate metadata.
        let tag_offset = sealed.len() - TAG_SIZE;
        let mut auth_tag = [0u8; TAG_SIZE];
        auth_tag.copy_from_slice(&sealed[tag_offset..]);
        sealed.truncate(tag_offset);

        Ok(EncryptedContent { ciphertext: sealed, iv, auth_tag })
    }

    /// Decrypt ciphertext under the session's key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::SessionKeyNotFound` if no key is cached.
    /// - `CryptoError::VerificationFailed` if authentication fails (tampered
    ///   ciphertext, tampered IV, or a different key). Never panics; callers
    ///   degrade to a placeholder message.
    pub fn decrypt(
        &self,
        session_id: &str,
        ciphertext: &[u8],
        iv: [u8; IV_SIZE],
        auth_tag: [u8; TAG_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = self.keys.get(session_id).ok_or_else(|| CryptoError::SessionKeyNotFound {
            session_id: session_id.to_string(),
        })?;

        let cipher = Aes256Gcm::new((&key.bytes).into());

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(&auth_tag);

        cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_key(fill: u8) -> [u8; SESSION_KEY_SIZE] {
        [fill; SESSION_KEY_SIZE]
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let mut store = SessionKeyStore::new();
        store.generate("s1", test_key(0x42)).unwrap();

        let content = store.encrypt("s1", b"hello", [7u8; IV_SIZE]).unwrap();
        assert_eq!(content.iv, [7u8; IV_SIZE]);
        assert_eq!(content.ciphertext.len(), 5);

        let plaintext =
            store.decrypt("s1", &content.ciphertext, content.iv, content.auth_tag).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn generate_is_idempotent() {
        let mut store = SessionKeyStore::new();
        store.generate("s1", test_key(0x01)).unwrap();

        let content = store.encrypt("s1", b"before", [1u8; IV_SIZE]).unwrap();

        // Second generate with different material must keep the first key.
        store.generate("s1", test_key(0xFF)).unwrap();
        let plaintext =
            store.decrypt("s1", &content.ciphertext, content.iv, content.auth_tag).unwrap();
        assert_eq!(plaintext, b"before");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn all_zero_material_is_rejected() {
        let mut store = SessionKeyStore::new();
        let result = store.generate("s1", [0u8; SESSION_KEY_SIZE]);
        assert!(matches!(result, Err(CryptoError::KeyGeneration { .. })));
        assert!(!store.contains("s1"));
    }

    #[test]
    fn encrypt_without_key_fails() {
        let store = SessionKeyStore::new();
        let result = store.encrypt("missing", b"data", [0u8; IV_SIZE]);
        assert!(matches!(result, Err(CryptoError::SessionKeyNotFound { .. })));
    }

    #[test]
    fn decrypt_with_wrong_session_never_yields_plaintext() {
        let mut store = SessionKeyStore::new();
        store.generate("s1", test_key(0x11)).unwrap();
        store.generate("s2", test_key(0x22)).unwrap();

        let content = store.encrypt("s1", b"secret", [3u8; IV_SIZE]).unwrap();

        let result = store.decrypt("s2", &content.ciphertext, content.iv, content.auth_tag);
        assert!(matches!(result, Err(CryptoError::VerificationFailed)));

        let result = store.decrypt("absent", &content.ciphertext, content.iv, content.auth_tag);
        assert!(matches!(result, Err(CryptoError::SessionKeyNotFound { .. })));
    }

    #[test]
    fn tampered_ciphertext_fails_verification() {
        let mut store = SessionKeyStore::new();
        store.generate("s1", test_key(0x33)).unwrap();

        let mut content = store.encrypt("s1", b"original", [5u8; IV_SIZE]).unwrap();
        content.ciphertext[0] ^= 0xFF;

        let result = store.decrypt("s1", &content.ciphertext, content.iv, content.auth_tag);
        assert!(matches!(result, Err(CryptoError::VerificationFailed)));
    }

    #[test]
    fn tampered_iv_fails_verification() {
        let mut store = SessionKeyStore::new();
        store.generate("s1", test_key(0x33)).unwrap();

        let content = store.encrypt("s1", b"original", [5u8; IV_SIZE]).unwrap();
        let mut wrong_iv = content.iv;
        wrong_iv[0] ^= 0x01;

        let result = store.decrypt("s1", &content.ciphertext, wrong_iv, content.auth_tag);
        assert!(matches!(result, Err(CryptoError::VerificationFailed)));
    }

    #[test]
    fn different_ivs_produce_different_ciphertexts() {
        let mut store = SessionKeyStore::new();
        store.generate("s1", test_key(0x55)).unwrap();

        let a = store.encrypt("s1", b"same plaintext", [1u8; IV_SIZE]).unwrap();
        let b = store.encrypt("s1", b"same plaintext", [2u8; IV_SIZE]).unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn remove_drops_the_key() {
        let mut store = SessionKeyStore::new();
        store.generate("s1", test_key(0x66)).unwrap();
        store.remove("s1");

        assert!(!store.contains("s1"));
        assert!(store.is_empty());
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let mut store = SessionKeyStore::new();
        store.generate("s1", test_key(0x77)).unwrap();

        let content = store.encrypt("s1", b"", [9u8; IV_SIZE]).unwrap();
        assert!(content.ciphertext.is_empty());

        let plaintext =
            store.decrypt("s1", &content.ciphertext, content.iv, content.auth_tag).unwrap();
        assert!(plaintext.is_empty());
    }
}
