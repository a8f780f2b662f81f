//! `NudgeService` wires the components together and adds the single-send
//! retry policy on top of the dispatch engine.

use std::sync::Arc;

use axum::Router;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::auth::{ConsentChannel, ConsentCoordinator, ConsentSurface, TokenStore, callback_routes};
use crate::clock::Clock;
use crate::config::{NudgeConfig, RetryPolicy};
use crate::dispatch::{
    BatchCancel, BatchOrchestrator, BatchProgress, BatchResult, BatchTarget, DispatchEngine,
    DispatchOutcome, DispatchRequest, OwnerProfile,
};
use crate::error::DispatchError;
use crate::limits::{CooldownTracker, QuotaLedger, SuppressionList};
use crate::mail::MailTransport;
use crate::observer::DispatchObserver;
use crate::store::DocumentStore;

/// External collaborators the service is built from.
pub struct ServiceDeps {
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<dyn Clock>,
    pub surface: Arc<dyn ConsentSurface>,
    pub transport: Arc<dyn MailTransport>,
    pub observer: Arc<dyn DispatchObserver>,
}

/// Entry point for sending nudges.
pub struct NudgeService {
    engine: Arc<DispatchEngine>,
    batch: BatchOrchestrator,
    channel: ConsentChannel,
    tokens: Arc<TokenStore>,
    retry: RetryPolicy,
}

impl NudgeService {
    pub fn new(config: &NudgeConfig, deps: ServiceDeps) -> Self {
        let ServiceDeps {
            store,
            clock,
            surface,
            transport,
            observer,
        } = deps;

        let tokens = Arc::new(TokenStore::new(
            store.clone(),
            clock.clone(),
            config.token_expiry_buffer,
        ));
        let channel = ConsentChannel::new(store.clone());
        let consent = Arc::new(ConsentCoordinator::new(
            config.consent.clone(),
            tokens.clone(),
            channel.clone(),
            surface,
        ));
        let engine = Arc::new(DispatchEngine::new(
            tokens.clone(),
            consent,
            Arc::new(QuotaLedger::new(
                store.clone(),
                clock.clone(),
                config.limits.daily_ceiling,
            )),
            Arc::new(CooldownTracker::new(
                store.clone(),
                clock.clone(),
                config.limits.cooldown_window,
            )),
            Arc::new(SuppressionList::new(store, clock)),
            transport,
            observer,
        ));
        let batch = BatchOrchestrator::new(engine.clone(), config.batch.item_delay);

        Self {
            engine,
            batch,
            channel,
            tokens,
            retry: config.retry.clone(),
        }
    }

    /// Landing routes that complete consent attempts started by this service.
    pub fn callback_router(&self) -> Router {
        callback_routes(self.channel.clone())
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn suppression(&self) -> &SuppressionList {
        self.engine.suppression()
    }

    /// Sends the owner has left today.
    pub async fn remaining_today(&self, owner_id: &str) -> u32 {
        self.engine.quota().remaining(owner_id).await
    }

    /// Send one nudge.
    ///
    /// Checks the daily quota first. A rejected token triggers one fresh
    /// consent and re-send; rate limits and timeouts are retried with backoff.
    pub async fn send_one(&self, request: &DispatchRequest) -> DispatchOutcome {
        let owner_id = request.owner.owner_id.as_str();
        if !self.engine.quota().can_send(owner_id).await {
            let outcome = DispatchOutcome::Failed(DispatchError::QuotaExceeded {
                ceiling: self.engine.quota().ceiling(),
            });
            self.engine.observer().on_outcome(request, &outcome);
            return outcome;
        }

        let mut outcome = self.engine.send(request).await;
        if outcome == DispatchOutcome::Failed(DispatchError::AuthExpired) {
            info!(owner_id, "Token rejected, re-authorizing once");
            outcome = self.engine.send(request).await;
        }

        let mut attempt = 0;
        while let DispatchOutcome::Failed(err) = &outcome {
            if !err.is_transient() || attempt >= self.retry.max_retries {
                break;
            }
            let retry_after = match err {
                DispatchError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.retry.jittered_delay_for(attempt, retry_after);
            warn!(
                owner_id,
                target_id = %request.target_id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient send failure, retrying"
            );
            sleep(delay).await;
            attempt += 1;
            outcome = self.engine.send(request).await;
        }

        outcome
    }

    /// Run a batch for `owner`. See [`BatchOrchestrator::run`].
    pub async fn run_batch<F>(
        &self,
        owner: &OwnerProfile,
        targets: &[BatchTarget],
        cancel: &BatchCancel,
        on_progress: F,
    ) -> BatchResult
    where
        F: FnMut(&BatchProgress),
    {
        self.batch.run(owner, targets, cancel, on_progress).await
    }
}
