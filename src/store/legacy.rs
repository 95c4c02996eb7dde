//! Legacy-path backend.
//!
//! The historical dispatch path kept its task table behind one global
//! mutex-guarded map. [`LegacyBackend`] reproduces that storage shape as
//! an owned value behind the same [`RegistryBackend`] trait as the modern
//! backend, so the gateway selects between eras with a flag and neither
//! path shares mutable globals with the other.
//!
//! Coarse `parking_lot::RwLock` over a single `HashMap` -- one writer at
//! a time, which is exactly the contention profile the legacy path had.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::store::backend::{BackendError, RegistryBackend, VersionedRecord};

/// Coarse-locked map backend mirroring the legacy dispatch path's storage.
#[derive(Debug, Default)]
pub struct LegacyBackend {
    data: RwLock<HashMap<String, (Vec<u8>, u64)>>,
}

impl LegacyBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records stored.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl RegistryBackend for LegacyBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, BackendError> {
        let data = self.data.read();
        let (bytes, version) = data.get(key).ok_or_else(|| BackendError::NotFound {
            key: key.to_string(),
        })?;
        Ok(VersionedRecord {
            data: bytes.clone(),
            version: *version,
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, BackendError> {
        let mut map = self.data.write();
        let new_version = map.get(key).map_or(1, |(_, v)| v + 1);
        map.insert(key.to_string(), (data.to_vec(), new_version));
        Ok(new_version)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, BackendError> {
        let mut map = self.data.write();
        let (_, current_version) = map.get(key).ok_or_else(|| BackendError::NotFound {
            key: key.to_string(),
        })?;
        let current_version = *current_version;
        if current_version != expected_version {
            return Err(BackendError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current_version,
            });
        }
        let new_version = current_version + 1;
        map.insert(key.to_string(), (data.to_vec(), new_version));
        Ok(new_version)
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.data.write().remove(key).is_some())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, BackendError> {
        Ok(self
            .data
            .read()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (data, version))| {
                (
                    key.clone(),
                    VersionedRecord {
                        data: data.clone(),
                        version: *version,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn behaves_like_the_modern_backend() {
        let backend = LegacyBackend::new();
        assert_eq!(backend.put("acct:t1", b"a").await.unwrap(), 1);
        assert_eq!(backend.put_if_version("acct:t1", b"b", 1).await.unwrap(), 2);
        assert!(matches!(
            backend.put_if_version("acct:t1", b"c", 1).await.unwrap_err(),
            BackendError::VersionConflict { .. }
        ));
        assert!(backend.delete("acct:t1").await.unwrap());
        assert!(!backend.delete("acct:t1").await.unwrap());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let backend = LegacyBackend::new();
        assert!(matches!(
            backend.get("nope").await.unwrap_err(),
            BackendError::NotFound { .. }
        ));
    }
}
