//! Persisted key-pair management for session-key exchange.
//!
//! Wraps the crypto crate's [`KeyPairStore`] with the durable bookkeeping
//! the dashboard and widget share: the active pair's record lives under the
//! session's key namespace, rotated pairs are archived under their own
//! namespace (so older wraps stay unwrappable), and cleanup sweeps archive
//! records past the retention age - including records left behind by
//! previous runs whose in-memory pairs are long gone.
//!
//! This path moves session keys to new participants out-of-band; nothing
//! here runs on the message hot path.

use std::time::Duration;

use chatwire_core::{Environment, StateStore, StorageError};
use chatwire_crypto::{
    import_public_key, install_wrapped_session_key, wrap_cached_session_key, CryptoError,
    KeyPairRecord, KeyPairStore, SessionKeyStore, RSA_KEY_BITS,
};
use chatwire_proto::SessionId;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::debug;

/// Rotation deadline for a generated pair.
pub const DEFAULT_KEY_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Retention age for archived pairs before cleanup purges them.
pub const DEFAULT_KEY_MAX_AGE: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// Key-ring errors.
#[derive(Debug, Error)]
pub enum KeyRingError {
    /// A cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The durable store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Key pairs for one session, with durable records.
pub struct KeyRing<S: StateStore> {
    store: S,
    pairs: KeyPairStore,
    session_id: SessionId,
    lifetime: Duration,
    key_bits: usize,
}

impl<S: StateStore> KeyRing<S> {
    /// Create a key ring for a session.
    pub fn new(store: S, session_id: SessionId) -> Self {
        Self {
            store,
            pairs: KeyPairStore::new(),
            session_id,
            lifetime: DEFAULT_KEY_LIFETIME,
            key_bits: RSA_KEY_BITS,
        }
    }

    /// Override the rotation lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Override the RSA modulus size (tests use a small one).
    pub fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    /// The active pair's record, generating or rotating first if needed.
    ///
    /// A missing pair is generated lazily; an expired pair is rotated, its
    /// record moving to the archive namespace. The active record is
    /// persisted on every change.
    ///
    /// # Errors
    ///
    /// Key generation and storage failures propagate; callers retry.
    pub fn ensure_active<E: Environment>(&mut self, env: &E) -> Result<KeyPairRecord, KeyRingError> {
        let now = env.unix_millis();
        let lifetime_ms = self.lifetime.as_millis() as u64;

        let needs_rotation =
            self.pairs.active(self.session_id.as_str()).is_some_and(|pair| pair.is_expired(now));

        if needs_rotation {
            if let Some(archived) = self.pairs.rotate(
                self.session_id.as_str(),
                &mut OsRng,
                self.key_bits,
                now,
                lifetime_ms,
            )? {
                debug!(key_id = %archived.key_id, "archived rotated key pair");
                self.store
                    .put(&self.archive_key(&archived.key_id), &serde_record(&archived)?)?;
            }
        } else {
            self.pairs.ensure(
                self.session_id.as_str(),
                &mut OsRng,
                self.key_bits,
                now,
                lifetime_ms,
            )?;
        }

        let record = self
            .pairs
            .active(self.session_id.as_str())
            .ok_or_else(|| CryptoError::KeyPairNotFound {
                key_id: self.session_id.as_str().to_string(),
            })?
            .record()?;

        self.store.put(&self.record_key(), &serde_record(&record)?)?;
        Ok(record)
    }

    /// DER public key of the active pair, for handing to a new participant.
    ///
    /// # Errors
    ///
    /// Key generation and storage failures propagate.
    pub fn public_key_for_exchange<E: Environment>(
        &mut self,
        env: &E,
    ) -> Result<Vec<u8>, KeyRingError> {
        let record = self.ensure_active(env)?;
        Ok(self.pairs.export_public_key(&record.key_id)?)
    }

    /// Wrap the session's cached symmetric key under a participant's
    /// public key (DER).
    ///
    /// # Errors
    ///
    /// - `CryptoError::SessionKeyNotFound` when no session key is cached.
    /// - `CryptoError::InvalidPublicKey` / `WrapFailed` from the exchange
    ///   primitives.
    pub fn wrap_session_key_for(
        &self,
        keys: &SessionKeyStore,
        recipient_der: &[u8],
    ) -> Result<Vec<u8>, KeyRingError> {
        let recipient = import_public_key(recipient_der)?;
        Ok(wrap_cached_session_key(keys, self.session_id.as_str(), &recipient, &mut OsRng)?)
    }

    /// Unwrap a received session key with our active pair and install it.
    ///
    /// # Errors
    ///
    /// - `CryptoError::UnwrapFailed` on a wrong pair or corrupted payload.
    pub fn install_wrapped<E: Environment>(
        &mut self,
        env: &E,
        keys: &mut SessionKeyStore,
        wrapped: &[u8],
    ) -> Result<(), KeyRingError> {
        self.ensure_active(env)?;

        let pair = self.pairs.active(self.session_id.as_str()).ok_or_else(|| {
            CryptoError::KeyPairNotFound { key_id: self.session_id.as_str().to_string() }
        })?;

        Ok(install_wrapped_session_key(keys, self.session_id.as_str(), pair, wrapped)?)
    }

    /// Purge archived pairs and records older than `max_age`.
    ///
    /// Sweeps the durable archive namespace, so records from previous runs
    /// are purged too. Session keys and the active pair are never touched.
    ///
    /// # Errors
    ///
    /// Storage failures propagate; a partial sweep is retried on the next
    /// cleanup.
    pub fn cleanup<E: Environment>(
        &mut self,
        env: &E,
        max_age: Duration,
    ) -> Result<Vec<String>, KeyRingError> {
        let now = env.unix_millis();
        let max_age_ms = max_age.as_millis() as u64;

        self.pairs.cleanup(now, max_age_ms);

        let mut purged = Vec::new();
        for key in self.store.keys_with_prefix(&self.archive_prefix())? {
            let Some(raw) = self.store.get(&key)? else { continue };

            let Ok(record) = serde_json::from_slice::<KeyPairRecord>(&raw) else {
                // Unreadable archive record: purge it, it can never be used.
                self.store.delete(&key)?;
                continue;
            };

            if now.saturating_sub(record.created_at) > max_age_ms {
                self.store.delete(&key)?;
                purged.push(record.key_id);
            }
        }

        Ok(purged)
    }

    fn record_key(&self) -> String {
        format!("chatwire:keys:{}", self.session_id)
    }

    fn archive_prefix(&self) -> String {
        format!("chatwire:keys:archive:{}:", self.session_id)
    }

    fn archive_key(&self, key_id: &str) -> String {
        format!("{}{key_id}", self.archive_prefix())
    }
}

fn serde_record(record: &KeyPairRecord) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(record).map_err(|e| StorageError::Serialization(e.to_string()))
}
