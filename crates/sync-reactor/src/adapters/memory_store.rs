//! In-memory key-value store.
//!
//! Several stores may share one backing map; each sees only its own
//! namespace, the way separate applications share one browser database.

use crate::domain::StorageError;
use crate::ports::KeyValueStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Shared backing map: `namespace:key → value`.
pub type SharedBackend = Arc<DashMap<String, String>>;

/// Namespaced in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    prefix: String,
    backend: SharedBackend,
}

impl MemoryStore {
    /// Store with its own backing map.
    pub fn new(namespace: &str) -> Self {
        Self::with_backend(namespace, Arc::new(DashMap::new()))
    }

    /// Store over a backing map shared with other namespaces.
    pub fn with_backend(namespace: &str, backend: SharedBackend) -> Self {
        Self {
            prefix: format!("{namespace}:"),
            backend,
        }
    }

    /// The backing map.
    pub fn backend(&self) -> SharedBackend {
        Arc::clone(&self.backend)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.backend.get(&self.key(key)).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.backend.insert(self.key(key), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(&self.key(key));
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.backend.retain(|key, _| !key.starts_with(&self.prefix));
        Ok(())
    }
}
