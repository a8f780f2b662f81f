//! Quota ledger: per-owner, per-day send counter against a fixed ceiling.
//!
//! Records live at `quota:{owner}:{YYYY-MM-DD}`. A new day simply has no
//! record yet, which reads as zero, so there is no reset job.
//!
//! Storage errors fail open: a broken counter must not block a legitimate
//! send. The ceiling is therefore best-effort under a store outage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::key_segment;
use crate::clock::{Clock, date_key};
use crate::error::StoreError;
use crate::store::{DocumentStore, get_doc, put_doc};

/// One owner's sends on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub owner_id: String,
    pub date_key: String,
    pub count: u32,
}

/// Tracks daily send counts.
pub struct QuotaLedger {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    ceiling: u32,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, ceiling: u32) -> Self {
        Self {
            store,
            clock,
            ceiling,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    fn key(owner_id: &str, date: &str) -> String {
        format!("quota:{}:{date}", key_segment(owner_id))
    }

    /// Today's record, or an implicit zero record when none exists yet.
    pub async fn today(&self, owner_id: &str) -> Result<QuotaRecord, StoreError> {
        let date = date_key(self.clock.now());
        let record = get_doc::<QuotaRecord>(self.store.as_ref(), &Self::key(owner_id, &date)).await?;
        Ok(record.unwrap_or(QuotaRecord {
            owner_id: owner_id.to_string(),
            date_key: date,
            count: 0,
        }))
    }

    /// Whether the owner is still under today's ceiling.
    pub async fn can_send(&self, owner_id: &str) -> bool {
        match self.today(owner_id).await {
            Ok(record) => record.count < self.ceiling,
            Err(e) => {
                warn!(owner_id, error = %e, "Quota read failed, allowing send");
                true
            }
        }
    }

    /// Sends left today. Reports the full ceiling when the counter can't be read.
    pub async fn remaining(&self, owner_id: &str) -> u32 {
        match self.today(owner_id).await {
            Ok(record) => self.ceiling.saturating_sub(record.count),
            Err(e) => {
                warn!(owner_id, error = %e, "Quota read failed, reporting full allowance");
                self.ceiling
            }
        }
    }

    /// Count one successful send against today.
    pub async fn record_send(&self, owner_id: &str) {
        let mut record = match self.today(owner_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(owner_id, error = %e, "Quota read failed, send not counted");
                return;
            }
        };
        record.count += 1;

        let key = Self::key(owner_id, &record.date_key);
        match put_doc(self.store.as_ref(), &key, &record).await {
            Ok(()) => debug!(owner_id, count = record.count, "Quota incremented"),
            Err(e) => warn!(owner_id, error = %e, "Quota write failed, send not counted"),
        }
    }
}
