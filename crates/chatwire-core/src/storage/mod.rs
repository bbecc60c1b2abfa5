//! Durable local state abstraction.
//!
//! The core persists its outgoing queue, key-pair records, and the advisory
//! lock lease through this trait. It is a plain key-value surface: the core
//! treats the store as an opaque sink and never assumes anything about the
//! backing medium. The trait is synchronous (no async) to keep the core
//! sans-IO; durable backends that need async internally adapt underneath.

mod error;
mod memory;

pub use error::StorageError;
pub use memory::MemoryStore;

/// Key-value storage for durable local state.
///
/// This trait must be:
/// - Clone: the queue, lock, and driver each hold a handle
/// - Send + Sync: handles cross task boundaries in the driver
/// - Synchronous: no async methods (sans-IO compliance)
///
/// # Clone Semantics
///
/// Implementations share internal state via Arc; clones observe each other's
/// writes. This mirrors browser-profile storage, where every holder sees the
/// same underlying data.
pub trait StateStore: Clone + Send + Sync + 'static {
    /// Read a value. Returns `None` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the underlying store cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value, overwriting any existing one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the write fails. Callers treat this as
    /// non-fatal: the in-memory copy stays authoritative and the failure is
    /// logged.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the delete fails.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in lexicographic order.
    ///
    /// Used to enumerate archive namespaces (rotated key pairs).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the scan fails.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
