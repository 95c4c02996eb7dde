//! Low-level key-value backend trait shared by the modern and legacy
//! registries.
//!
//! Backends are dumb KV stores. Domain logic (status transitions, scope
//! isolation, result idempotence, expiry) does **not** belong here; it
//! lives in [`GenericTaskRegistry`](crate::store::generic::GenericTaskRegistry).
//!
//! # Key Structure
//!
//! Keys are composite strings in the format `{account_id}:{task_id}`.
//! The colon separator is safe because account ids are issued without
//! colons and task ids are UUIDv4. Prefix queries use `{account_id}:` to
//! scope listings to an account.
//!
//! # Versioning
//!
//! Each stored record carries a monotonic `u64` version starting at 1,
//! incremented on every successful write.
//! [`put_if_version`](RegistryBackend::put_if_version) provides
//! compare-and-swap semantics for optimistic concurrency.

use async_trait::async_trait;
use thiserror::Error;

/// A stored record paired with its monotonic version number.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// Serialized record bytes (canonical JSON).
    pub data: Vec<u8>,

    /// Monotonic version, starting at 1.
    pub version: u64,
}

/// Errors surfaced by raw backend operations. The generic registry maps
/// these to crate-level [`Error`](crate::error::Error) variants before
/// they reach callers.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No record under the given key.
    #[error("key not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A CAS write observed a different version than expected.
    #[error("version conflict on key {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The contested key.
        key: String,
        /// Version the caller expected.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// I/O or backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Key-value backend for task persistence.
///
/// Implementations must be `Send + Sync`; every inbound call runs on an
/// independently scheduled worker. Backends must never implement status
/// validation, scope checking, or expiry policy.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Retrieves a record by key.
    ///
    /// # Errors
    ///
    /// - [`BackendError::NotFound`] if no record exists for the key.
    async fn get(&self, key: &str) -> Result<VersionedRecord, BackendError>;

    /// Stores a record unconditionally. New keys get version 1; existing
    /// keys increment. Returns the assigned version.
    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, BackendError>;

    /// Stores a record only if the current version matches.
    ///
    /// # Errors
    ///
    /// - [`BackendError::NotFound`] if no record exists for the key.
    /// - [`BackendError::VersionConflict`] on version mismatch.
    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, BackendError>;

    /// Deletes a record. Returns `true` if the key existed (idempotent).
    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    /// Lists `(key, record)` pairs whose key starts with `prefix`.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, BackendError>;
}

/// Constructs a storage key from account and task identifiers.
///
/// # Examples
///
/// ```
/// use taskmesh::store::backend::make_key;
///
/// assert_eq!(make_key("acct-1", "task-9"), "acct-1:task-9");
/// ```
pub fn make_key(account_id: &str, task_id: &str) -> String {
    format!("{account_id}:{task_id}")
}

/// Parses a storage key into `(account_id, task_id)`. Returns `None` when
/// the key has no colon.
///
/// # Examples
///
/// ```
/// use taskmesh::store::backend::parse_key;
///
/// assert_eq!(parse_key("acct-1:task-9"), Some(("acct-1", "task-9")));
/// assert_eq!(parse_key("bare"), None);
/// ```
pub fn parse_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

/// Prefix matching every record owned by `account_id`.
pub fn make_prefix(account_id: &str) -> String {
    format!("{account_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trip() {
        let key = make_key("acct-1", "task-abc");
        assert_eq!(parse_key(&key), Some(("acct-1", "task-abc")));
        assert!(key.starts_with(&make_prefix("acct-1")));
    }

    #[test]
    fn parse_splits_on_first_colon() {
        assert_eq!(parse_key("a:b:c"), Some(("a", "b:c")));
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::VersionConflict {
            key: "acct:task".to_string(),
            expected: 2,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("acct:task"));
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("found 5"));
    }
}
