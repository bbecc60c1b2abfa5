//! In-memory storage implementation for testing and simulation.

#![allow(clippy::expect_used, reason = "synchronous in-memory operations only")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use super::{StateStore, StorageError};

/// In-memory key-value store.
///
/// Uses a `BTreeMap` so prefix scans come back in lexicographic order. State
/// is wrapped in `Arc<Mutex<>>` to allow Clone and shared visibility across
/// clones - which also makes it a faithful stand-in for cross-tab shared
/// storage in advisory-lock tests. Uses `lock().expect()`, which panics if
/// the mutex is poisoned; acceptable for test code.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys. Useful in tests.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("mutex poisoned").len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("mutex poisoned").is_empty()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.lock().expect("mutex poisoned").get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.inner.lock().expect("mutex poisoned").insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.lock().expect("mutex poisoned").remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .inner
            .lock()
            .expect("mutex poisoned")
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
