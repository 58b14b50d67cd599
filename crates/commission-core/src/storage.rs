//! Persistent storage abstraction
//!
//! The policy layer treats durable storage as a simple key/value service.
//! Real deployments back this with the platform's non-volatile store; tests
//! and the demo driver use the in-memory implementation.

use std::collections::BTreeMap;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by the key/value service
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend unavailable")]
    Unavailable,

    #[error("Write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Read failed for key {key}: {reason}")]
    ReadFailed { key: String, reason: String },
}

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Key/value storage abstraction for bonding and credential state
pub trait KeyValueStore: Send {
    /// Store a value under a key, replacing any previous value
    fn put(&mut self, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Retrieve a value by key
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete a key, ignoring absence
    fn delete(&mut self, key: &str) -> Result<(), StorageError>;

    /// Remove every key (full reset)
    fn clear_all(&mut self) -> Result<(), StorageError>;
}

// ----------------------------------------------------------------------------
// In-Memory Implementation
// ----------------------------------------------------------------------------

/// In-memory key/value store for tests and the demo driver
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&mut self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), data);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        self.data.clear();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let mut store = MemoryStore::new();
        store.put("a", vec![1, 2, 3]).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(vec![1, 2, 3]));

        store.put("a", vec![4]).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(vec![4]));

        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        // Deleting an absent key is not an error
        store.delete("a").unwrap();
    }

    #[test]
    fn test_clear_all() {
        let mut store = MemoryStore::new();
        store.put("a", vec![1]).unwrap();
        store.put("b", vec![2]).unwrap();
        store.clear_all().unwrap();
        assert!(store.is_empty());
    }
}
