//! Dispatch engine: entitlement, token, envelope, send, bookkeeping.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::outcome::{DispatchOutcome, DispatchRequest, SkipReason};
use crate::auth::{AccessToken, ConsentFlow, TokenStore};
use crate::error::{DispatchError, TransportError};
use crate::limits::{CooldownTracker, QuotaLedger, SuppressionList};
use crate::mail::{MailTransport, build_raw_message};
use crate::observer::DispatchObserver;

/// Sends one request. The daily quota is the caller's responsibility.
pub struct DispatchEngine {
    tokens: Arc<TokenStore>,
    consent: Arc<dyn ConsentFlow>,
    quota: Arc<QuotaLedger>,
    cooldown: Arc<CooldownTracker>,
    suppression: Arc<SuppressionList>,
    transport: Arc<dyn MailTransport>,
    observer: Arc<dyn DispatchObserver>,
}

impl DispatchEngine {
    pub fn new(
        tokens: Arc<TokenStore>,
        consent: Arc<dyn ConsentFlow>,
        quota: Arc<QuotaLedger>,
        cooldown: Arc<CooldownTracker>,
        suppression: Arc<SuppressionList>,
        transport: Arc<dyn MailTransport>,
        observer: Arc<dyn DispatchObserver>,
    ) -> Self {
        Self {
            tokens,
            consent,
            quota,
            cooldown,
            suppression,
            transport,
            observer,
        }
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn suppression(&self) -> &SuppressionList {
        &self.suppression
    }

    pub fn observer(&self) -> &dyn DispatchObserver {
        self.observer.as_ref()
    }

    /// Run the send pipeline and report the outcome to the observer.
    pub async fn send(&self, request: &DispatchRequest) -> DispatchOutcome {
        let outcome = self.dispatch(request).await;
        self.observer.on_outcome(request, &outcome);
        outcome
    }

    /// Why `request` may not be sent right now, if anything.
    ///
    /// Checks required fields, the suppression list and the cooldown window,
    /// all without network I/O.
    pub async fn entitlement(&self, request: &DispatchRequest) -> Option<SkipReason> {
        for (field, value) in [
            ("recipient address", &request.recipient_address),
            ("subject", &request.subject),
            ("body", &request.body),
        ] {
            if value.trim().is_empty() {
                return Some(SkipReason::Invalid(field.to_string()));
            }
        }

        if self
            .suppression
            .is_suppressed(&request.recipient_address)
            .await
        {
            return Some(SkipReason::Unsubscribed);
        }

        let status = self
            .cooldown
            .check(&request.owner.owner_id, &request.target_id)
            .await;
        if let (false, Some(retry_after), Some(retry_after_days)) =
            (status.allowed, status.retry_after, status.retry_after_days)
        {
            return Some(SkipReason::Cooldown {
                retry_after,
                retry_after_days,
            });
        }

        None
    }

    async fn dispatch(&self, request: &DispatchRequest) -> DispatchOutcome {
        if let Some(reason) = self.entitlement(request).await {
            debug!(target_id = %request.target_id, reason = %reason, "Send not entitled");
            return DispatchOutcome::Skipped(reason);
        }

        let token = match self.token().await {
            Ok(token) => token,
            Err(e) => return DispatchOutcome::Failed(e),
        };

        let raw = match build_raw_message(
            &request.owner,
            &request.recipient_address,
            &request.subject,
            &request.body,
        ) {
            Ok(raw) => raw,
            Err(e) => return DispatchOutcome::Failed(e),
        };

        match self.transport.send(&token, &raw).await {
            Ok(message_id) => {
                let owner_id = request.owner.owner_id.as_str();
                self.cooldown.record(owner_id, &request.target_id).await;
                self.quota.record_send(owner_id).await;
                DispatchOutcome::Sent { message_id }
            }
            Err(TransportError::AuthExpired) => {
                info!("Provider rejected the token, clearing it");
                if let Err(e) = self.tokens.clear().await {
                    warn!(error = %e, "Failed to clear rejected token");
                }
                DispatchOutcome::Failed(DispatchError::AuthExpired)
            }
            Err(e) => DispatchOutcome::Failed(e.into()),
        }
    }

    async fn token(&self) -> Result<AccessToken, DispatchError> {
        if let Some(token) = self.tokens.get().await {
            return Ok(token);
        }
        debug!("No usable token, starting consent");
        Ok(self.consent.obtain().await?)
    }
}
