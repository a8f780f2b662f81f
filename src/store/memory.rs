//! In-process document stores: an ephemeral map and an always-failing stub.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::traits::{DocumentStore, merge_patch};

/// Ephemeral store backed by a `HashMap`. Used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.docs.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.docs.write().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn merge(&self, key: &str, patch: &Value) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let doc = docs.entry(key.to_string()).or_insert(Value::Null);
        merge_patch(doc, patch);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.docs.write().await.remove(key).is_some())
    }
}

/// A store whose every operation fails. Simulates a storage outage.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn outage(op: &str) -> StoreError {
        StoreError::Unavailable(format!("{op}: simulated outage"))
    }
}

#[async_trait]
impl DocumentStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Err(Self::outage("get"))
    }

    async fn put(&self, _key: &str, _value: &Value) -> Result<(), StoreError> {
        Err(Self::outage("put"))
    }

    async fn merge(&self, _key: &str, _patch: &Value) -> Result<(), StoreError> {
        Err(Self::outage("merge"))
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(Self::outage("delete"))
    }
}
