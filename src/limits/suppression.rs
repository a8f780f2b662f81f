//! Suppression list: addresses that opted out of outreach.
//!
//! Entries live at `unsubscribed:{address}` with the address lowercased.
//! A failed read is treated as "not suppressed" and logged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{DocumentStore, get_doc, put_doc};

/// Why an address was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    #[default]
    UserOptOut,
    Bounced,
    Complained,
    AdminAction,
}

/// A single suppression record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub address: String,
    pub reason: SuppressionReason,
    pub created_at: DateTime<Utc>,
}

/// Durable opt-out set.
pub struct SuppressionList {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl SuppressionList {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn key(address: &str) -> String {
        format!("unsubscribed:{}", normalize(address))
    }

    /// Whether `address` has opted out.
    pub async fn is_suppressed(&self, address: &str) -> bool {
        match self.entry(address).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                warn!(address, error = %e, "Suppression lookup failed, treating as not suppressed");
                false
            }
        }
    }

    /// The stored entry for `address`, if any.
    pub async fn entry(&self, address: &str) -> Result<Option<SuppressionEntry>, StoreError> {
        get_doc(self.store.as_ref(), &Self::key(address)).await
    }

    /// Add `address` to the list. Re-adding overwrites the reason.
    pub async fn add(
        &self,
        address: &str,
        reason: SuppressionReason,
    ) -> Result<SuppressionEntry, StoreError> {
        let entry = SuppressionEntry {
            address: normalize(address),
            reason,
            created_at: self.clock.now(),
        };
        put_doc(self.store.as_ref(), &Self::key(address), &entry).await?;
        info!(address = %entry.address, reason = ?reason, "Suppression entry added");
        Ok(entry)
    }

    /// Remove `address`. Returns whether it was present.
    pub async fn remove(&self, address: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete(&Self::key(address)).await?;
        if removed {
            info!(address, "Suppression entry removed");
        }
        Ok(removed)
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}
