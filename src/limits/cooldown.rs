//! Cooldown tracker: minimum gap between two sends from one owner to one target.
//!
//! Records live at `cooldown:{owner}:{target}` (segments escaped) and are merged, never replaced,
//! after a confirmed send. Storage errors fail open, like the quota ledger.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::key_segment;
use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{DocumentStore, get_doc};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Last successful send from an owner to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownRecord {
    pub owner_id: String,
    pub target_id: String,
    pub last_sent_at: DateTime<Utc>,
    #[serde(default)]
    pub send_count: u32,
}

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    pub allowed: bool,
    /// Exact time left in the window, when blocked.
    pub retry_after: Option<TimeDelta>,
    /// `retry_after` rounded up to whole days, for user messaging.
    pub retry_after_days: Option<i64>,
}

impl CooldownStatus {
    fn clear() -> Self {
        Self {
            allowed: true,
            retry_after: None,
            retry_after_days: None,
        }
    }

    fn blocked(remaining: TimeDelta) -> Self {
        Self {
            allowed: false,
            retry_after: Some(remaining),
            retry_after_days: Some(ceil_days(remaining)),
        }
    }
}

/// Round a positive duration up to whole days.
pub fn ceil_days(d: TimeDelta) -> i64 {
    let ms = d.num_milliseconds().max(0);
    (ms + DAY_MS - 1) / DAY_MS
}

/// Enforces the per-(owner, target) cooldown window.
pub struct CooldownTracker {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    window: TimeDelta,
}

impl CooldownTracker {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, window: TimeDelta) -> Self {
        Self {
            store,
            clock,
            window,
        }
    }

    fn key(owner_id: &str, target_id: &str) -> String {
        format!(
            "cooldown:{}:{}",
            key_segment(owner_id),
            key_segment(target_id)
        )
    }

    /// The stored record, if the owner ever sent to this target.
    pub async fn last_send(
        &self,
        owner_id: &str,
        target_id: &str,
    ) -> Result<Option<CooldownRecord>, StoreError> {
        get_doc(self.store.as_ref(), &Self::key(owner_id, target_id)).await
    }

    /// Whether a send to `target_id` is allowed right now.
    pub async fn check(&self, owner_id: &str, target_id: &str) -> CooldownStatus {
        let record = match self.last_send(owner_id, target_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return CooldownStatus::clear(),
            Err(e) => {
                warn!(owner_id, target_id, error = %e, "Cooldown read failed, allowing send");
                return CooldownStatus::clear();
            }
        };

        let elapsed = self.clock.now() - record.last_sent_at;
        if elapsed < self.window {
            CooldownStatus::blocked(self.window - elapsed)
        } else {
            CooldownStatus::clear()
        }
    }

    /// Stamp a confirmed send.
    pub async fn record(&self, owner_id: &str, target_id: &str) {
        let previous = match self.last_send(owner_id, target_id).await {
            Ok(record) => record.map(|r| r.send_count).unwrap_or(0),
            Err(e) => {
                warn!(owner_id, target_id, error = %e, "Cooldown read failed before record");
                0
            }
        };

        let patch = json!({
            "owner_id": owner_id,
            "target_id": target_id,
            "last_sent_at": self.clock.now(),
            "send_count": previous + 1,
        });

        match self.store.merge(&Self::key(owner_id, target_id), &patch).await {
            Ok(()) => debug!(owner_id, target_id, send_count = previous + 1, "Cooldown recorded"),
            Err(e) => warn!(owner_id, target_id, error = %e, "Cooldown write failed"),
        }
    }
}
