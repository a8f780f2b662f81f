//! Batch orchestrator: sequential sends over an ordered target list.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use super::engine::DispatchEngine;
use super::outcome::{DispatchOutcome, DispatchRequest, OwnerProfile, SkipReason};
use crate::error::DispatchError;

/// One company to nudge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTarget {
    pub target_id: String,
    pub target_name: String,
    /// Comma-joined contact addresses. Only the first is used.
    #[serde(default)]
    pub recipients: String,
    pub subject: String,
    pub body: String,
}

impl BatchTarget {
    /// First non-blank address in `recipients`.
    pub fn primary_recipient(&self) -> Option<&str> {
        self.recipients
            .split(',')
            .map(str::trim)
            .find(|addr| !addr.is_empty())
    }
}

/// Per-item classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Sent,
    Failed,
    Skipped,
}

impl From<&DispatchOutcome> for ItemStatus {
    fn from(outcome: &DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::Sent { .. } => Self::Sent,
            DispatchOutcome::Failed(_) => Self::Failed,
            DispatchOutcome::Skipped(_) => Self::Skipped,
        }
    }
}

/// Reported after every item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based position of the item just processed.
    pub current: usize,
    pub total: usize,
    pub target_name: String,
    pub status: ItemStatus,
    /// Skip or failure reason, for display.
    pub detail: Option<String>,
}

/// A target that was not sent, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchError {
    pub target_name: String,
    pub error: String,
}

/// Aggregate of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// In target order.
    pub errors: Vec<BatchError>,
    /// The run ended early on request.
    pub cancelled: bool,
}

impl BatchResult {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    fn record(&mut self, target_name: &str, outcome: &DispatchOutcome) {
        match ItemStatus::from(outcome) {
            ItemStatus::Sent => self.sent += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::Skipped => self.skipped += 1,
        }
        if let Some(error) = outcome.describe() {
            self.errors.push(BatchError {
                target_name: target_name.to_string(),
                error,
            });
        }
    }

    /// Items that reached a classification.
    pub fn processed(&self) -> usize {
        self.sent + self.failed + self.skipped
    }
}

/// Cancellation signal for a running batch.
#[derive(Clone)]
pub struct BatchCancel {
    tx: Arc<watch::Sender<bool>>,
}

impl BatchCancel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for BatchCancel {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs targets one at a time through the dispatch engine.
pub struct BatchOrchestrator {
    engine: Arc<DispatchEngine>,
    item_delay: Duration,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<DispatchEngine>, item_delay: Duration) -> Self {
        Self { engine, item_delay }
    }

    /// Send to every target in order, pausing `item_delay` between items.
    ///
    /// Stops early when cancelled, when the owner's daily quota runs out, or
    /// when consent could not be obtained. Consent is never re-prompted within
    /// a run. The partial result is returned either way.
    pub async fn run<F>(
        &self,
        owner: &OwnerProfile,
        targets: &[BatchTarget],
        cancel: &BatchCancel,
        mut on_progress: F,
    ) -> BatchResult
    where
        F: FnMut(&BatchProgress),
    {
        let total = targets.len();
        let mut result = BatchResult::new(total);
        info!(owner_id = %owner.owner_id, total, "Batch started");

        for (index, target) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            if index > 0 {
                tokio::select! {
                    _ = sleep(self.item_delay) => {}
                    _ = cancel.cancelled() => {
                        result.cancelled = true;
                        break;
                    }
                }
            }

            let (outcome, stop) = self.run_item(owner, target).await;
            result.record(&target.target_name, &outcome);
            on_progress(&BatchProgress {
                current: index + 1,
                total,
                target_name: target.target_name.clone(),
                status: ItemStatus::from(&outcome),
                detail: outcome.describe(),
            });

            if stop {
                let reason = outcome.describe().unwrap_or_default();
                warn!(
                    owner_id = %owner.owner_id,
                    remaining = total - index - 1,
                    reason = %reason,
                    "Stopping batch"
                );
                break;
            }
        }

        if result.cancelled {
            info!(owner_id = %owner.owner_id, processed = result.processed(), "Batch cancelled");
        }
        self.engine
            .observer()
            .on_batch_complete(&owner.owner_id, &result);
        result
    }

    /// Process one target. The flag is set when the batch must stop.
    async fn run_item(&self, owner: &OwnerProfile, target: &BatchTarget) -> (DispatchOutcome, bool) {
        let request = DispatchRequest {
            target_id: target.target_id.clone(),
            target_name: target.target_name.clone(),
            recipient_address: target.primary_recipient().unwrap_or_default().to_string(),
            subject: target.subject.clone(),
            body: target.body.clone(),
            owner: owner.clone(),
        };

        let precheck = if request.recipient_address.is_empty() {
            Some((DispatchOutcome::Skipped(SkipReason::MissingAddress), false))
        } else if !self.engine.quota().can_send(&owner.owner_id).await {
            let ceiling = self.engine.quota().ceiling();
            Some((
                DispatchOutcome::Failed(DispatchError::QuotaExceeded { ceiling }),
                true,
            ))
        } else {
            self.engine
                .entitlement(&request)
                .await
                .map(|reason| (DispatchOutcome::Skipped(reason), false))
        };

        if let Some((outcome, stop)) = precheck {
            self.engine.observer().on_outcome(&request, &outcome);
            return (outcome, stop);
        }

        let outcome = self.engine.send(&request).await;
        let stop = matches!(outcome, DispatchOutcome::Failed(DispatchError::Auth(_)));
        (outcome, stop)
    }
}
