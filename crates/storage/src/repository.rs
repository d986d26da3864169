use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("quota exceeded: write needs {requested} bytes, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Bytes an entry occupies in a browser-style store: UTF-16 code units of key
/// and value, two bytes each.
#[must_use]
pub fn entry_size(key: &str, value: &str) -> u64 {
    let units = key.encode_utf16().count() + value.encode_utf16().count();
    (units as u64).saturating_mul(2)
}

/// Byte-constrained string key/value store shared by every consumer.
///
/// Any `set` may fail with `StorageError::QuotaExceeded`. Separate calls are not
/// atomic with respect to each other.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite a value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` if the write does not fit, or other
    /// backend errors.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key; removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Configured byte budget, if the backend knows one.
    fn quota_bytes(&self) -> Option<u64>;

    /// Total bytes used across all keys.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn used_bytes(&self) -> Result<u64, StorageError> {
        let mut total = 0_u64;
        for key in self.keys().await? {
            if let Some(value) = self.get(&key).await? {
                total = total.saturating_add(entry_size(&key, &value));
            }
        }
        Ok(total)
    }
}

/// In-memory store with an optional byte quota, for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    quota: Option<u64>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            quota: Some(quota_bytes),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if let Some(quota) = self.quota {
            let used: u64 = guard
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_size(k, v))
                .sum();
            let requested = entry_size(key, value);
            let available = quota.saturating_sub(used);
            if requested > available {
                return Err(StorageError::QuotaExceeded {
                    requested,
                    available,
                });
            }
        }
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }

    async fn used_bytes(&self) -> Result<u64, StorageError> {
        Ok(self.lock()?.iter().map(|(k, v)| entry_size(k, v)).sum())
    }
}
