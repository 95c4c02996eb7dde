//! In-memory backend for the modern dispatch path.
//!
//! [`InMemoryBackend`] is a thread-safe [`RegistryBackend`] over
//! `DashMap<String, (Vec<u8>, u64)>` with fine-grained shard locking.
//! It is a dumb KV store; all registry intelligence lives in
//! [`GenericTaskRegistry`](crate::store::generic::GenericTaskRegistry).

use dashmap::DashMap;

use async_trait::async_trait;

use crate::store::backend::{BackendError, RegistryBackend, VersionedRecord};

/// Thread-safe in-memory storage backend using [`DashMap`].
///
/// # Examples
///
/// ```
/// use taskmesh::store::generic::GenericTaskRegistry;
/// use taskmesh::store::memory::InMemoryBackend;
///
/// let registry = GenericTaskRegistry::new(InMemoryBackend::new());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: DashMap<String, (Vec<u8>, u64)>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of records stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl RegistryBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, BackendError> {
        let entry = self.data.get(key).ok_or_else(|| BackendError::NotFound {
            key: key.to_string(),
        })?;
        let (data, version) = entry.value();
        Ok(VersionedRecord {
            data: data.clone(),
            version: *version,
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, BackendError> {
        let new_version = self.data.get(key).map_or(1, |entry| entry.value().1 + 1);
        self.data
            .insert(key.to_string(), (data.to_vec(), new_version));
        Ok(new_version)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, BackendError> {
        let mut entry = self
            .data
            .get_mut(key)
            .ok_or_else(|| BackendError::NotFound {
                key: key.to_string(),
            })?;
        let current_version = entry.value().1;
        if current_version != expected_version {
            return Err(BackendError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current_version,
            });
        }
        let new_version = current_version + 1;
        *entry.value_mut() = (data.to_vec(), new_version);
        Ok(new_version)
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.data.remove(key).is_some())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, BackendError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| {
                let (data, version) = entry.value();
                (
                    entry.key().clone(),
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
    async fn put_assigns_monotonic_versions() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.put("k", b"a").await.unwrap(), 1);
        assert_eq!(backend.put("k", b"b").await.unwrap(), 2);
        let record = backend.get("k").await.unwrap();
        assert_eq!(record.data, b"b");
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn cas_rejects_stale_version() {
        let backend = InMemoryBackend::new();
        backend.put("k", b"a").await.unwrap();
        backend.put_if_version("k", b"b", 1).await.unwrap();

        let err = backend.put_if_version("k", b"c", 1).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.put("k", b"a").await.unwrap();
        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn list_by_prefix_scopes() {
        let backend = InMemoryBackend::new();
        backend.put("acct-1:t1", b"a").await.unwrap();
        backend.put("acct-1:t2", b"b").await.unwrap();
        backend.put("acct-2:t3", b"c").await.unwrap();

        let listed = backend.list_by_prefix("acct-1:").await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
