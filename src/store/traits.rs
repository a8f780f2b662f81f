//! `DocumentStore` trait: the single persistence seam for tokens, quota,
//! cooldown, suppression and consent signals.
//!
//! Documents are JSON values addressed by composite string keys such as
//! `quota:{owner}:{date}` or `cooldown:{owner}:{target}`. There are no
//! multi-key transactions.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;

/// Backend-agnostic key/document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a document, replacing whatever was there.
    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Apply a JSON merge patch (RFC 7396) to the document, creating it if absent.
    async fn merge(&self, key: &str, patch: &Value) -> Result<(), StoreError>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Read and deserialize a document.
pub async fn get_doc<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and write a document.
pub async fn put_doc<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    key: &str,
    doc: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(doc)?;
    store.put(key, &value).await
}

/// Apply an RFC 7396 merge patch to `target` in place.
///
/// Object members are merged recursively, `null` members remove keys, and any
/// non-object patch replaces the target wholesale.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}
