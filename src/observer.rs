//! Dispatch telemetry hooks. Observers see outcomes but never change them.

use tracing::{info, warn};

use crate::dispatch::{BatchResult, DispatchOutcome, DispatchRequest};

/// Receives every send outcome and every finished batch.
pub trait DispatchObserver: Send + Sync {
    fn on_outcome(&self, request: &DispatchRequest, outcome: &DispatchOutcome);

    fn on_batch_complete(&self, owner_id: &str, result: &BatchResult);
}

/// Emits one structured log event per outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_outcome(&self, request: &DispatchRequest, outcome: &DispatchOutcome) {
        let owner_id = request.owner.owner_id.as_str();
        let target_id = request.target_id.as_str();
        match outcome {
            DispatchOutcome::Sent { message_id } => {
                info!(owner_id, target_id, message_id = %message_id, "Nudge sent")
            }
            DispatchOutcome::Skipped(reason) => {
                info!(owner_id, target_id, reason = %reason, "Nudge skipped")
            }
            DispatchOutcome::Failed(err) => {
                warn!(owner_id, target_id, error = %err, "Nudge failed")
            }
        }
    }

    fn on_batch_complete(&self, owner_id: &str, result: &BatchResult) {
        info!(
            owner_id,
            total = result.total,
            sent = result.sent,
            failed = result.failed,
            skipped = result.skipped,
            cancelled = result.cancelled,
            "Batch complete"
        );
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {
    fn on_outcome(&self, _request: &DispatchRequest, _outcome: &DispatchOutcome) {}

    fn on_batch_complete(&self, _owner_id: &str, _result: &BatchResult) {}
}
