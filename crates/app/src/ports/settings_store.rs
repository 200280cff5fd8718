//! Settings store port — persistent key/value documents.

use std::future::Future;

use serde_json::Value;

use hubrelay_domain::error::BridgeError;

/// Persistent storage of JSON settings documents by key.
pub trait SettingsStore: Send + Sync {
    /// Read a document. Missing keys yield `None`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, BridgeError>> + Send;

    /// Write (insert or replace) a document.
    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

impl<T: SettingsStore> SettingsStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, BridgeError>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).set(key, value)
    }
}
