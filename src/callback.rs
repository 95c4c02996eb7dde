//! Callback registry: content-addressed completion sinks for async tasks.
//!
//! A submitter that wants asynchronous completion registers a
//! [`SinkDescriptor`] plus a [`CompletionSink`] and gets back a token to
//! attach to submissions. Tokens are content-addressed -- SHA-256 over the
//! canonical descriptor, URL-safe base64 -- so multiple submitters sharing
//! one driver collapse onto a single registration instead of piling up
//! duplicates.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::task::TaskResult;

/// Description of where completions should be delivered.
///
/// Two descriptors with equal fields are the same registration: the token
/// is derived from the content, not from registration order.
///
/// `properties` is a `BTreeMap` so canonical serialization is independent
/// of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkDescriptor {
    /// The driver this sink belongs to (service name, plugin id, ...).
    pub driver_id: String,

    /// Delivery endpoint understood by the driver.
    pub endpoint: String,

    /// Driver-specific delivery properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl SinkDescriptor {
    /// A descriptor with no extra properties.
    pub fn new(driver_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            driver_id: driver_id.into(),
            endpoint: endpoint.into(),
            properties: BTreeMap::new(),
        }
    }

    /// The content-addressed token for this descriptor.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskmesh::callback::SinkDescriptor;
    ///
    /// let a = SinkDescriptor::new("ci-driver", "queue://completions");
    /// let b = SinkDescriptor::new("ci-driver", "queue://completions");
    /// assert_eq!(a.token(), b.token());
    ///
    /// let c = SinkDescriptor::new("ci-driver", "queue://other");
    /// assert_ne!(a.token(), c.token());
    /// ```
    pub fn token(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.driver_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.endpoint.as_bytes());
        hasher.update([0u8]);
        // BTreeMap iterates in key order, so this serialization is canonical.
        hasher.update(serde_json::to_vec(&self.properties).unwrap_or_default());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Caller-supplied async completion sink.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    /// Delivers a terminal result for `task_id`.
    async fn deliver(&self, task_id: &str, result: &TaskResult) -> Result<()>;
}

struct CallbackRegistration {
    descriptor: SinkDescriptor,
    sink: Arc<dyn CompletionSink>,
}

/// Registry of completion sinks keyed by content-addressed token.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: DashMap<String, CallbackRegistration>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers `sink` under the descriptor's token, or returns the
    /// existing token when an equivalent descriptor is already registered.
    pub fn ensure_callback(
        &self,
        descriptor: SinkDescriptor,
        sink: Arc<dyn CompletionSink>,
    ) -> String {
        let token = descriptor.token();
        self.entries
            .entry(token.clone())
            .or_insert_with(|| CallbackRegistration { descriptor, sink });
        token
    }

    /// The descriptor registered under `token`, if any.
    pub fn descriptor(&self, token: &str) -> Option<SinkDescriptor> {
        self.entries.get(token).map(|e| e.descriptor.clone())
    }

    /// Returns `true` if `token` is registered.
    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delivers `result` through the sink registered under `token`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown token.
    pub async fn deliver(&self, token: &str, task_id: &str, result: &TaskResult) -> Result<()> {
        let sink = self
            .entries
            .get(token)
            .map(|e| Arc::clone(&e.sink))
            .ok_or_else(|| Error::not_found("callback", token))?;
        sink.deliver(task_id, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct RecordingSink {
        delivered: Mutex<Vec<(String, TaskResult)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionSink for RecordingSink {
        async fn deliver(&self, task_id: &str, result: &TaskResult) -> Result<()> {
            self.delivered
                .lock()
                .push((task_id.to_string(), result.clone()));
            Ok(())
        }
    }

    #[test]
    fn equal_descriptors_same_token() {
        let registry = CallbackRegistry::new();
        let first = registry.ensure_callback(
            SinkDescriptor::new("driver-a", "queue://done"),
            RecordingSink::new(),
        );
        let second = registry.ensure_callback(
            SinkDescriptor::new("driver-a", "queue://done"),
            RecordingSink::new(),
        );
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn property_order_does_not_change_token() {
        let mut a = SinkDescriptor::new("d", "e");
        a.properties.insert("x".to_string(), "1".to_string());
        a.properties.insert("y".to_string(), "2".to_string());

        let mut b = SinkDescriptor::new("d", "e");
        b.properties.insert("y".to_string(), "2".to_string());
        b.properties.insert("x".to_string(), "1".to_string());

        assert_eq!(a.token(), b.token());
    }

    #[tokio::test]
    async fn delivery_reaches_first_registered_sink() {
        let registry = CallbackRegistry::new();
        let winner = RecordingSink::new();
        let loser = RecordingSink::new();

        let token = registry.ensure_callback(
            SinkDescriptor::new("driver-a", "queue://done"),
            Arc::clone(&winner) as Arc<dyn CompletionSink>,
        );
        registry.ensure_callback(
            SinkDescriptor::new("driver-a", "queue://done"),
            Arc::clone(&loser) as Arc<dyn CompletionSink>,
        );

        let result = TaskResult::success(json!({"ok": true}));
        registry.deliver(&token, "task-1", &result).await.unwrap();

        assert_eq!(winner.delivered.lock().len(), 1);
        assert!(loser.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let registry = CallbackRegistry::new();
        let err = registry
            .deliver("missing", "task-1", &TaskResult::aborted())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
