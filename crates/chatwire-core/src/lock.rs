//! Cross-tab advisory connection lock.
//!
//! A cooperative, non-enforced lease in shared durable storage that keeps
//! two tabs of the same logical session from opening duplicate connections.
//! The lease carries an owner id and an expiry so a crashed tab cannot hold
//! the lock forever. Nothing here prevents a misbehaving writer - the lock
//! is advisory by design, and the holder releases it unconditionally on
//! teardown, including error paths.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::{StateStore, StorageError};

/// How long a lease stays valid without a refresh.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);

/// The persisted lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    /// Owner tab id.
    pub owner: String,
    /// Unix-millisecond expiry; a lease past this is considered stale.
    pub expires_at: u64,
}

/// Advisory lock over a [`StateStore`] key.
#[derive(Clone)]
pub struct AdvisoryLock<S: StateStore> {
    store: S,
    key: String,
    owner: String,
    lease: Duration,
}

impl<S: StateStore> AdvisoryLock<S> {
    /// Create a lock handle for one owner (typically one per tab).
    pub fn new(store: S, key: impl Into<String>, owner: impl Into<String>) -> Self {
        Self { store, key: key.into(), owner: owner.into(), lease: DEFAULT_LEASE_DURATION }
    }

    /// Override the lease duration.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Try to acquire (or re-acquire) the lock.
    ///
    /// Returns `true` when we now hold it: the slot was free, the existing
    /// lease was ours, or the existing lease had expired. Returns `false`
    /// when another live owner holds it - the caller skips connecting and
    /// observes the lease until it frees up.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` when the shared store cannot be read/written.
    pub fn acquire(&self, now_millis: u64) -> Result<bool, StorageError> {
        if let Some(lease) = self.holder()? {
            if lease.owner != self.owner && lease.expires_at > now_millis {
                return Ok(false);
            }
        }

        self.write_lease(now_millis)?;
        Ok(true)
    }

    /// Extend our lease. Call periodically while connected.
    ///
    /// Returns `false` when the lease was lost to another owner in the
    /// meantime (we did not overwrite it).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` when the shared store cannot be read/written.
    pub fn refresh(&self, now_millis: u64) -> Result<bool, StorageError> {
        match self.holder()? {
            Some(lease) if lease.owner != self.owner && lease.expires_at > now_millis => Ok(false),
            _ => {
                self.write_lease(now_millis)?;
                Ok(true)
            },
        }
    }

    /// Release the lock if we hold it. Never fails the caller's teardown:
    /// a lease held by someone else is simply left alone.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` when the shared store cannot be read/written.
    pub fn release(&self) -> Result<(), StorageError> {
        if let Some(lease) = self.holder()? {
            if lease.owner == self.owner {
                self.store.delete(&self.key)?;
            }
        }
        Ok(())
    }

    /// Observe the current lease, if any. Other tabs poll this to notice
    /// the lock freeing up.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` when the shared store cannot be read.
    pub fn holder(&self) -> Result<Option<LockLease>, StorageError> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(None);
        };

        // A corrupt lease record is treated as absent rather than wedging
        // every tab out of connecting.
        Ok(serde_json::from_slice(&raw).ok())
    }

    fn write_lease(&self, now_millis: u64) -> Result<(), StorageError> {
        let lease = LockLease {
            owner: self.owner.clone(),
            expires_at: now_millis + self.lease.as_millis() as u64,
        };
        self.store.put(&self.key, &serde_json::to_vec(&lease)?)
    }
}
