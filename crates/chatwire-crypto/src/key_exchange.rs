//! RSA-OAEP key-pair management for session-key transport.
//!
//! These primitives move a session key to a new participant out-of-band;
//! they never touch the message hot path. Key pairs rotate on a fixed
//! lifetime and rotated pairs are archived, not deleted, so session keys
//! wrapped under an older pair can still be unwrapped.
//!
//! Durable storage only ever sees a [`KeyPairRecord`]: the public key plus
//! an opaque reference to the private half. The private key itself stays in
//! memory.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::{
    pkcs8::{DecodePublicKey, EncodePublicKey},
    rand_core::CryptoRngCore,
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// RSA modulus size for generated key pairs.
pub const RSA_KEY_BITS: usize = 2048;

/// An asymmetric key pair used only for session-key exchange.
pub struct KeyPair {
    key_id: String,
    private: RsaPrivateKey,
    public: RsaPublicKey,
    created_at: u64,
    expires_at: u64,
}

impl KeyPair {
    /// Stable identifier derived from the public key.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Creation time in unix milliseconds.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Rotation deadline in unix milliseconds.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Whether the rotation deadline has passed.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Public half of the pair.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Export the public key as DER bytes for transport.
    pub fn export_public_key(&self) -> Result<Vec<u8>, CryptoError> {
        self.public
            .to_public_key_der()
            .map(|der| der.as_bytes().to_vec())
            .map_err(|e| CryptoError::InvalidPublicKey { reason: e.to_string() })
    }

    /// The persistable record for this pair: public key and metadata only.
    pub fn record(&self) -> Result<KeyPairRecord, CryptoError> {
        Ok(KeyPairRecord {
            key_id: self.key_id.clone(),
            public_key: STANDARD.encode(self.export_public_key()?),
            encrypted_private_key_ref: format!("mem:{}", self.key_id),
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

/// Durable form of a key pair. The private key is represented only by an
/// opaque reference; compromise of stored records exposes no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairRecord {
    /// Stable pair identifier.
    pub key_id: String,
    /// Base64 DER public key.
    pub public_key: String,
    /// Opaque handle to the private half.
    pub encrypted_private_key_ref: String,
    /// Creation time in unix milliseconds.
    pub created_at: u64,
    /// Rotation deadline in unix milliseconds.
    pub expires_at: u64,
}

/// Generate a fresh RSA key pair.
///
/// `bits` is [`RSA_KEY_BITS`] in production; tests pass a smaller modulus.
///
/// # Errors
///
/// - `CryptoError::KeyPairGeneration` if RSA generation fails.
pub fn generate_key_pair<R: CryptoRngCore + ?Sized>(
    rng: &mut R,
    bits: usize,
    now: u64,
    lifetime_ms: u64,
) -> Result<KeyPair, CryptoError> {
    let private = RsaPrivateKey::new(rng, bits)
        .map_err(|e| CryptoError::KeyPairGeneration { reason: e.to_string() })?;
    let public = RsaPublicKey::from(&private);

    let der = public
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyPairGeneration { reason: e.to_string() })?;
    let key_id = derive_key_id(der.as_bytes());

    Ok(KeyPair { key_id, private, public, created_at: now, expires_at: now + lifetime_ms })
}

/// Import a peer's public key from DER bytes.
///
/// # Errors
///
/// - `CryptoError::InvalidPublicKey` if the bytes are not a valid DER key.
pub fn import_public_key(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| CryptoError::InvalidPublicKey { reason: e.to_string() })
}

/// Wrap a session key under a recipient's public key (RSA-OAEP-SHA256).
///
/// # Errors
///
/// - `CryptoError::WrapFailed` if the OAEP encryption fails (e.g. the
///   payload exceeds the modulus capacity).
pub fn wrap_session_key<R: CryptoRngCore + ?Sized>(
    mut rng: &mut R,
    recipient: &RsaPublicKey,
    session_key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    recipient
        .encrypt(&mut rng, Oaep::new::<Sha256>(), session_key)
        .map_err(|e| CryptoError::WrapFailed { reason: e.to_string() })
}

/// Unwrap a session key with our private key.
///
/// # Errors
///
/// - `CryptoError::UnwrapFailed` on a wrong key or corrupted payload.
pub fn unwrap_session_key(pair: &KeyPair, wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
    pair.private
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|e| CryptoError::UnwrapFailed { reason: e.to_string() })
}

/// Wrap a cached session key for transport to a new participant.
///
/// # Errors
///
/// - `CryptoError::SessionKeyNotFound` when the session has no cached key.
/// - `CryptoError::WrapFailed` when the OAEP encryption fails.
pub fn wrap_cached_session_key<R: CryptoRngCore + ?Sized>(
    keys: &crate::session_keys::SessionKeyStore,
    session_id: &str,
    recipient: &RsaPublicKey,
    rng: &mut R,
) -> Result<Vec<u8>, CryptoError> {
    let material = keys.key_material(session_id).ok_or_else(|| {
        CryptoError::SessionKeyNotFound { session_id: session_id.to_string() }
    })?;

    wrap_session_key(rng, recipient, material)
}

/// Unwrap a received session key and install it into the store.
///
/// Installation follows the store's idempotence: a key already cached for
/// the session wins over the received one.
///
/// # Errors
///
/// - `CryptoError::UnwrapFailed` on a wrong key, corrupted payload, or a
///   payload that is not a valid session key.
pub fn install_wrapped_session_key(
    keys: &mut crate::session_keys::SessionKeyStore,
    session_id: &str,
    pair: &KeyPair,
    wrapped: &[u8],
) -> Result<(), CryptoError> {
    let material = unwrap_session_key(pair, wrapped)?;

    let material: [u8; crate::session_keys::SESSION_KEY_SIZE] =
        material.try_into().map_err(|_| CryptoError::UnwrapFailed {
            reason: "unwrapped payload is not a session key".to_string(),
        })?;

    keys.install(session_id, material)
}

/// Key pairs per session, with an archive of rotated pairs.
///
/// # Invariants
///
/// - Rotation never discards a pair; the old pair moves to the archive so
///   keys wrapped under it stay unwrappable.
/// - `cleanup` purges only archived pairs past the age limit; active pairs
///   and session keys are never touched.
#[derive(Default)]
pub struct KeyPairStore {
    active: HashMap<String, KeyPair>,
    archive: HashMap<String, KeyPair>,
}

impl KeyPairStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self { active: HashMap::new(), archive: HashMap::new() }
    }

    /// The active pair for a session, generating one lazily if absent.
    pub fn ensure<R: CryptoRngCore + ?Sized>(
        &mut self,
        session_id: &str,
        rng: &mut R,
        bits: usize,
        now: u64,
        lifetime_ms: u64,
    ) -> Result<&KeyPair, CryptoError> {
        if !self.active.contains_key(session_id) {
            let pair = generate_key_pair(rng, bits, now, lifetime_ms)?;
            self.active.insert(session_id.to_string(), pair);
        }

        // Just inserted or already present.
        self.active
            .get(session_id)
            .ok_or_else(|| CryptoError::KeyPairNotFound { key_id: session_id.to_string() })
    }

    /// The active pair for a session, if any.
    pub fn active(&self, session_id: &str) -> Option<&KeyPair> {
        self.active.get(session_id)
    }

    /// Look up a pair by key id, searching active pairs then the archive.
    pub fn find(&self, key_id: &str) -> Option<&KeyPair> {
        self.active
            .values()
            .find(|p| p.key_id == key_id)
            .or_else(|| self.archive.get(key_id))
    }

    /// Export the public key of the pair with the given id.
    ///
    /// # Errors
    ///
    /// - `CryptoError::KeyPairNotFound` if no pair has this id.
    pub fn export_public_key(&self, key_id: &str) -> Result<Vec<u8>, CryptoError> {
        self.find(key_id)
            .ok_or_else(|| CryptoError::KeyPairNotFound { key_id: key_id.to_string() })?
            .export_public_key()
    }

    /// Rotate the session's pair: archive the old one, install a fresh one.
    ///
    /// Returns the record of the archived pair (for the caller's archive
    /// namespace), if a pair existed.
    pub fn rotate<R: CryptoRngCore + ?Sized>(
        &mut self,
        session_id: &str,
        rng: &mut R,
        bits: usize,
        now: u64,
        lifetime_ms: u64,
    ) -> Result<Option<KeyPairRecord>, CryptoError> {
        let archived = match self.active.remove(session_id) {
            Some(old) => {
                let record = old.record()?;
                self.archive.insert(old.key_id.clone(), old);
                Some(record)
            },
            None => None,
        };

        let fresh = generate_key_pair(rng, bits, now, lifetime_ms)?;
        self.active.insert(session_id.to_string(), fresh);

        Ok(archived)
    }

    /// Purge archived pairs older than `max_age_ms`. Returns purged key ids.
    pub fn cleanup(&mut self, now: u64, max_age_ms: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .archive
            .iter()
            .filter(|(_, pair)| now.saturating_sub(pair.created_at) > max_age_ms)
            .map(|(key_id, _)| key_id.clone())
            .collect();

        for key_id in &expired {
            self.archive.remove(key_id);
        }

        expired
    }

    /// Number of archived pairs.
    pub fn archived_count(&self) -> usize {
        self.archive.len()
    }
}

/// Key id: first 8 bytes of SHA-256 over the public DER, hex-rendered.
fn derive_key_id(public_der: &[u8]) -> String {
    let digest = Sha256::digest(public_der);
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}
