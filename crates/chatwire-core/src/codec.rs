//! Message content codec.
//!
//! Wraps plaintext into the wire envelope and back. With encryption enabled
//! the codec drives the session-key store (lazily generating a key, bounded
//! retries) and produces real AES-GCM envelopes; disabled, it produces the
//! base64 pass-through form so the wire shape stays uniform either way.
//!
//! Decoding never fails: a tampered or undecryptable envelope degrades to a
//! marked placeholder so the conversation log keeps every message. Both
//! directions cache their results, which absorbs retried sends and duplicate
//! deliveries without recomputation.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chatwire_crypto::{CryptoError, SessionKeyStore, IV_SIZE, SESSION_KEY_SIZE, TAG_SIZE};
use chatwire_proto::{
    Algorithm, EncryptedEnvelope, EnvelopeMetadata, MessageType, SessionId, ENVELOPE_VERSION,
};
use thiserror::Error;

use crate::env::Environment;

/// Rendered in place of content that failed decryption.
pub const DECRYPT_FAILED_PLACEHOLDER: &str = "[encrypted message - unable to decrypt]";

/// Cap on session-key acquisition attempts before surfacing failure.
pub const MAX_SESSION_KEY_ATTEMPTS: usize = 10;

/// Errors from envelope encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No session key could be acquired within the retry budget.
    #[error("no session key available after {attempts} attempts")]
    KeyUnavailable {
        /// How many acquisition attempts were made.
        attempts: usize,
    },
}

/// Envelope encoder/decoder with per-session result caches.
pub struct MessageCodec {
    enabled: bool,
    /// (session id, plaintext) -> envelope, so retried sends reuse one
    /// ciphertext.
    encrypt_cache: HashMap<(String, String), EncryptedEnvelope>,
    /// (session id, encrypted content) -> plaintext, so duplicate
    /// deliveries skip the AEAD.
    decrypt_cache: HashMap<(String, String), String>,
}

impl MessageCodec {
    /// Create a codec with encryption on or off.
    pub fn new(encryption_enabled: bool) -> Self {
        Self { enabled: encryption_enabled, encrypt_cache: HashMap::new(), decrypt_cache: HashMap::new() }
    }

    /// Whether envelopes are currently encrypted.
    pub fn encryption_enabled(&self) -> bool {
        self.enabled
    }

    /// Flip the encryption toggle. Both caches are cleared on an actual
    /// flip - cached results from the other mode must not leak across.
    pub fn set_encryption_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.encrypt_cache.clear();
            self.decrypt_cache.clear();
        }
    }

    /// Wrap plaintext into an envelope.
    ///
    /// With encryption disabled this is a reversible base64 pass-through.
    /// Enabled, it ensures a session key exists (self-healing, up to
    /// [`MAX_SESSION_KEY_ATTEMPTS`] attempts) and encrypts under a fresh
    /// random IV.
    ///
    /// # Errors
    ///
    /// - `CodecError::KeyUnavailable` when the retry budget is exhausted.
    pub fn encode<E: Environment>(
        &mut self,
        env: &E,
        keys: &mut SessionKeyStore,
        session_id: &SessionId,
        plaintext: &str,
        message_type: MessageType,
    ) -> Result<EncryptedEnvelope, CodecError> {
        if !self.enabled {
            return Ok(EncryptedEnvelope {
                encrypted_content: STANDARD.encode(plaintext.as_bytes()),
                metadata: EnvelopeMetadata {
                    key_id: String::new(),
                    algorithm: Algorithm::None,
                    iv: String::new(),
                    auth_tag: String::new(),
                    timestamp: env.unix_millis(),
                    version: ENVELOPE_VERSION,
                },
                message_type,
                original_length: plaintext.len(),
            });
        }

        let cache_key = (session_id.as_str().to_string(), plaintext.to_string());
        if let Some(envelope) = self.encrypt_cache.get(&cache_key) {
            return Ok(envelope.clone());
        }

        self.ensure_session_key(env, keys, session_id)?;

        let mut iv = [0u8; IV_SIZE];
        env.random_bytes(&mut iv);

        let content = keys
            .encrypt(session_id.as_str(), plaintext.as_bytes(), iv)
            .map_err(|_| CodecError::KeyUnavailable { attempts: MAX_SESSION_KEY_ATTEMPTS })?;

        let envelope = EncryptedEnvelope {
            encrypted_content: STANDARD.encode(&content.ciphertext),
            metadata: EnvelopeMetadata {
                key_id: session_id.as_str().to_string(),
                algorithm: Algorithm::Aes256Gcm,
                iv: hex::encode(content.iv),
                auth_tag: hex::encode(content.auth_tag),
                timestamp: env.unix_millis(),
                version: ENVELOPE_VERSION,
            },
            message_type,
            original_length: plaintext.len(),
        };

        self.encrypt_cache.insert(cache_key, envelope.clone());
        Ok(envelope)
    }

    /// Unwrap an envelope back to plaintext.
    ///
    /// Never fails: undecryptable content comes back as
    /// [`DECRYPT_FAILED_PLACEHOLDER`] so the caller can still append a
    /// message to the log.
    pub fn decode(
        &mut self,
        keys: &SessionKeyStore,
        session_id: &SessionId,
        envelope: &EncryptedEnvelope,
    ) -> String {
        let cache_key = (session_id.as_str().to_string(), envelope.encrypted_content.clone());
        if let Some(plaintext) = self.decrypt_cache.get(&cache_key) {
            return plaintext.clone();
        }

        let plaintext = match envelope.metadata.algorithm {
            Algorithm::None => decode_passthrough(envelope),
            Algorithm::Aes256Gcm => decrypt_envelope(keys, session_id, envelope),
        };

        match plaintext {
            Some(plaintext) => {
                // Failures stay uncached: a key installed later may still
                // recover this envelope.
                self.decrypt_cache.insert(cache_key, plaintext.clone());
                plaintext
            },
            None => DECRYPT_FAILED_PLACEHOLDER.to_string(),
        }
    }

    /// Lazily install a session key, retrying with fresh randomness.
    fn ensure_session_key<E: Environment>(
        &self,
        env: &E,
        keys: &mut SessionKeyStore,
        session_id: &SessionId,
    ) -> Result<(), CodecError> {
        for _ in 0..MAX_SESSION_KEY_ATTEMPTS {
            if keys.contains(session_id.as_str()) {
                return Ok(());
            }

            let mut material = [0u8; SESSION_KEY_SIZE];
            env.random_bytes(&mut material);

            match keys.generate(session_id.as_str(), material) {
                Ok(()) => return Ok(()),
                Err(CryptoError::KeyGeneration { .. }) => {},
                Err(_) => break,
            }
        }

        Err(CodecError::KeyUnavailable { attempts: MAX_SESSION_KEY_ATTEMPTS })
    }
}

fn decode_passthrough(envelope: &EncryptedEnvelope) -> Option<String> {
    let bytes = STANDARD.decode(&envelope.encrypted_content).ok()?;
    String::from_utf8(bytes).ok()
}

fn decrypt_envelope(
    keys: &SessionKeyStore,
    session_id: &SessionId,
    envelope: &EncryptedEnvelope,
) -> Option<String> {
    let iv_bytes = hex::decode(&envelope.metadata.iv).ok()?;
    let tag_bytes = hex::decode(&envelope.metadata.auth_tag).ok()?;
    let ciphertext = STANDARD.decode(&envelope.encrypted_content).ok()?;

    let iv: [u8; IV_SIZE] = iv_bytes.try_into().ok()?;
    let auth_tag: [u8; TAG_SIZE] = tag_bytes.try_into().ok()?;

    let plaintext = keys.decrypt(session_id.as_str(), &ciphertext, iv, auth_tag).ok()?;
    String::from_utf8(plaintext).ok()
}
