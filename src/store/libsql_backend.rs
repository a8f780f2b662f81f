//! libSQL backend: durable `DocumentStore` implementation.
//!
//! One `documents` table keyed by the composite document key; bodies are
//! JSON text. Merges run inside SQLite via `json_patch`, so a merge is a
//! single statement.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::DocumentStore;

/// libSQL document store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Document store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[async_trait]
impl DocumentStore for LibSqlStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT body FROM documents WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Query(format!("get {key}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let body: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get {key}: {e}")))?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get {key}: {e}"))),
        }
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO documents (key, body, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![key, body, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("put {key}: {e}")))?;

        debug!(key, "Document written");
        Ok(())
    }

    async fn merge(&self, key: &str, patch: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(patch)?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO documents (key, body, updated_at) VALUES (?1, json_patch('{}', ?2), ?3)
                 ON CONFLICT (key) DO UPDATE SET
                    body = json_patch(documents.body, excluded.body),
                    updated_at = excluded.updated_at",
                params![key, body, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("merge {key}: {e}")))?;

        debug!(key, "Document merged");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let count = self
            .conn()
            .execute("DELETE FROM documents WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Query(format!("delete {key}: {e}")))?;
        Ok(count > 0)
    }
}
