//! Consent flow coordinator.
//!
//! Runs one interactive authorization attempt at a time. An attempt opens the
//! consent surface and then waits on a single `select!` loop that combines the
//! pushed signal, a poll of the durable signal key, surface-closure detection
//! and the hard timeout. The first of those to resolve wins and the attempt is
//! torn down. The hard timeout runs from the moment the attempt starts
//! awaiting, so a surface that never finishes opening still times out.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::signal::{ConsentChannel, ConsentSignal};
use super::surface::{ConsentSurface, SurfaceHandle};
use super::token::{AccessToken, TokenStore};
use crate::config::ConsentConfig;
use crate::error::AuthError;

/// Anything that can produce a fresh access token.
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    async fn obtain(&self) -> Result<AccessToken, AuthError>;
}

/// Lifecycle of a single consent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    AwaitingSignal,
    Succeeded,
    Failed,
    TimedOut,
}

impl AttemptState {
    pub fn can_transition_to(&self, target: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, target),
            (Idle, AwaitingSignal)
                | (AwaitingSignal, Succeeded)
                | (AwaitingSignal, Failed)
                | (AwaitingSignal, TimedOut)
                | (Succeeded, Idle)
                | (Failed, Idle)
                | (TimedOut, Idle)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingSignal => "awaiting_signal",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// Resources held by a live attempt.
///
/// Dropping an attempt that was never cleaned up (the caller gave up on
/// `obtain`) schedules the same teardown on the runtime.
struct ConsentAttempt {
    channel: ConsentChannel,
    handle: Arc<dyn SurfaceHandle>,
    cleaned: bool,
}

impl ConsentAttempt {
    fn new(channel: ConsentChannel, handle: Box<dyn SurfaceHandle>) -> Self {
        Self {
            channel,
            handle: Arc::from(handle),
            cleaned: false,
        }
    }

    /// Delete the signal key and close the surface. Safe to call repeatedly.
    async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        teardown(&self.channel, self.handle.as_ref()).await;
    }
}

impl Drop for ConsentAttempt {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Consent attempt abandoned outside a runtime, surface left open");
            return;
        };
        info!("Consent attempt abandoned, tearing down");
        let channel = self.channel.clone();
        let handle = self.handle.clone();
        runtime.spawn(async move {
            teardown(&channel, handle.as_ref()).await;
        });
    }
}

async fn teardown(channel: &ConsentChannel, handle: &dyn SurfaceHandle) {
    if let Err(e) = channel.clear().await {
        warn!(error = %e, "Failed to clear consent signal");
    }
    if !handle.is_closed() {
        handle.close().await;
    }
    debug!("Consent attempt cleaned up");
}

/// Settles the coordinator's state when `obtain` finishes or is dropped.
struct SettleOnDrop<'a> {
    coordinator: &'a ConsentCoordinator,
    terminal: AttemptState,
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        self.coordinator.settle(self.terminal);
    }
}

/// Serializes consent attempts and caches their result in the token store.
pub struct ConsentCoordinator {
    config: ConsentConfig,
    tokens: Arc<TokenStore>,
    channel: ConsentChannel,
    surface: Arc<dyn ConsentSurface>,
    in_flight: tokio::sync::Mutex<()>,
    state: Mutex<AttemptState>,
}

impl ConsentCoordinator {
    pub fn new(
        config: ConsentConfig,
        tokens: Arc<TokenStore>,
        channel: ConsentChannel,
        surface: Arc<dyn ConsentSurface>,
    ) -> Self {
        Self {
            config,
            tokens,
            channel,
            surface,
            in_flight: tokio::sync::Mutex::new(()),
            state: Mutex::new(AttemptState::Idle),
        }
    }

    /// Current attempt state.
    pub fn state(&self) -> AttemptState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, next: AttemptState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.can_transition_to(next) {
            warn!(from = %*state, to = %next, "Ignoring invalid consent state transition");
            return;
        }
        debug!(from = %*state, to = %next, "Consent state transition");
        *state = next;
    }

    /// Move a live attempt through `terminal` back to `Idle`.
    fn settle(&self, terminal: AttemptState) {
        if self.state() == AttemptState::AwaitingSignal {
            self.transition(terminal);
        }
        if self.state().is_terminal() {
            self.transition(AttemptState::Idle);
        }
    }

    /// Provider authorization URL for an attempt identified by `nonce`.
    pub fn authorization_url(&self, nonce: &str) -> Result<String, AuthError> {
        let redirect_uri = self.config.redirect_uri();
        let url = reqwest::Url::parse_with_params(
            &self.config.auth_endpoint,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "token"),
                ("scope", self.config.scope.as_str()),
                ("state", nonce),
                ("include_granted_scopes", "true"),
            ],
        )
        .map_err(|e| AuthError::Blocked(format!("invalid authorization endpoint: {e}")))?;
        Ok(url.into())
    }

    async fn run_attempt(&self) -> Result<AccessToken, AuthError> {
        let nonce = Uuid::new_v4().simple().to_string();
        let url = self.authorization_url(&nonce)?;

        if let Err(e) = self.channel.clear().await {
            warn!(error = %e, "Failed to clear stale consent signal");
        }
        // Subscribe before the surface exists so an instant callback is not missed.
        let push = self.channel.subscribe();

        self.transition(AttemptState::AwaitingSignal);
        let deadline = Instant::now() + self.config.hard_timeout;
        info!(nonce = %nonce, "Opening consent surface");
        let handle = match timeout_at(deadline, self.surface.open(&url)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(error = %e, "Consent surface could not be opened");
                return Err(e.into());
            }
            Err(_) => {
                warn!(timeout = ?self.config.hard_timeout, "Consent surface never finished opening");
                if let Err(e) = self.channel.clear().await {
                    warn!(error = %e, "Failed to clear consent signal");
                }
                return Err(AuthError::Timeout(self.config.hard_timeout));
            }
        };

        let mut attempt = ConsentAttempt::new(self.channel.clone(), handle);
        let resolved = self
            .await_signal(attempt.handle.as_ref(), push, &nonce, deadline)
            .await;
        attempt.cleanup().await;

        match resolved? {
            ConsentSignal::Success {
                access_token,
                expires_in,
                ..
            } => {
                let token = match self.tokens.put(&access_token, expires_in).await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(error = %e, "Token could not be cached, using it for this session only");
                        self.tokens.mint(&access_token, expires_in)
                    }
                };
                info!(expires_at = %token.expires_at(), "Consent granted");
                Ok(token)
            }
            ConsentSignal::Failure { reason, .. } => {
                warn!(reason = %reason, "Consent denied");
                Err(AuthError::Denied(reason))
            }
        }
    }

    async fn await_signal(
        &self,
        handle: &dyn SurfaceHandle,
        push: broadcast::Receiver<ConsentSignal>,
        nonce: &str,
        deadline: Instant,
    ) -> Result<ConsentSignal, AuthError> {
        let started = Instant::now();
        let deadline = sleep_until(deadline);
        tokio::pin!(deadline);

        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut push = Some(push);
        let mut closed_since: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(timeout = ?self.config.hard_timeout, "Consent attempt timed out");
                    return Err(AuthError::Timeout(self.config.hard_timeout));
                }
                pushed = next_pushed(&mut push) => {
                    match pushed {
                        Some(signal) if signal.matches(nonce) => {
                            debug!("Consent signal received via push");
                            return Ok(signal);
                        }
                        Some(_) => debug!("Ignoring pushed signal for another attempt"),
                        None => {}
                    }
                }
                _ = poll.tick() => {
                    match self.channel.read().await {
                        Ok(Some(signal)) if signal.matches(nonce) => {
                            debug!("Consent signal received via poll");
                            return Ok(signal);
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "Consent signal poll failed"),
                    }

                    if started.elapsed() < self.config.min_before_close_check {
                        continue;
                    }
                    match closed_since {
                        None if handle.is_closed() => {
                            info!(grace = ?self.config.close_grace, "Consent surface closed, waiting for a late signal");
                            closed_since = Some(Instant::now());
                        }
                        Some(since) if since.elapsed() >= self.config.close_grace => {
                            info!("No consent signal after surface closed");
                            return Err(AuthError::Cancelled);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Next pushed signal. Pending forever once the push path is gone.
async fn next_pushed(
    push: &mut Option<broadcast::Receiver<ConsentSignal>>,
) -> Option<ConsentSignal> {
    let Some(rx) = push.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Ok(signal) => Some(signal),
        Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "Consent push receiver lagged");
            None
        }
        Err(RecvError::Closed) => {
            debug!("Consent push channel closed, relying on poll");
            *push = None;
            None
        }
    }
}

#[async_trait]
impl ConsentFlow for ConsentCoordinator {
    async fn obtain(&self) -> Result<AccessToken, AuthError> {
        let _guard = self.in_flight.lock().await;

        // A caller queued behind a finished attempt reuses its token.
        if let Some(token) = self.tokens.get().await {
            debug!("Token available, skipping consent");
            return Ok(token);
        }

        // Failed unless the attempt reports otherwise; also covers a dropped caller.
        let mut settle = SettleOnDrop {
            coordinator: self,
            terminal: AttemptState::Failed,
        };
        let result = self.run_attempt().await;
        settle.terminal = match &result {
            Ok(_) => AttemptState::Succeeded,
            Err(AuthError::Timeout(_)) => AttemptState::TimedOut,
            Err(_) => AttemptState::Failed,
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::{DateTime, TimeDelta, Utc};
    use tokio::time::sleep;

    use crate::auth::signal::SIGNAL_KEY;
    use crate::auth::surface::SurfaceError;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, put_doc};

    #[derive(Clone, Copy)]
    enum Behavior {
        /// Publish a success signal as soon as the page opens.
        Approve,
        /// Publish an `access_denied` failure.
        Deny,
        /// Write a success signal to the store only, after a delay.
        ApproveViaStore(Duration),
        /// Never answer.
        Ignore,
        /// Report closed immediately and never answer.
        CloseAtOnce,
        /// Report closed immediately but answer via the store after a delay.
        CloseThenApprove(Duration),
        /// Answer with a signal carrying the wrong nonce.
        WrongNonce,
        /// Fail to open.
        Block,
        /// Never finish opening.
        Hang,
    }

    struct FakeSurface {
        behavior: Behavior,
        channel: ConsentChannel,
        store: Arc<MemoryStore>,
        opens: AtomicUsize,
        released: Arc<AtomicBool>,
    }

    struct FakeHandle {
        closed_by_user: bool,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SurfaceHandle for FakeHandle {
        fn is_closed(&self) -> bool {
            self.closed_by_user || self.released.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn nonce_of(url: &str) -> String {
        reqwest::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn approval(state: String) -> ConsentSignal {
        ConsentSignal::Success {
            access_token: "ya29.granted".into(),
            expires_in: 3599,
            state: Some(state),
        }
    }

    fn write_later(store: Arc<MemoryStore>, delay: Duration, signal: ConsentSignal) {
        tokio::spawn(async move {
            sleep(delay).await;
            put_doc(&*store, SIGNAL_KEY, &signal).await.unwrap();
        });
    }

    #[async_trait]
    impl ConsentSurface for FakeSurface {
        async fn open(&self, url: &str) -> Result<Box<dyn SurfaceHandle>, SurfaceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let nonce = nonce_of(url);
            let mut closed_by_user = false;

            match self.behavior {
                Behavior::Approve => self.channel.publish(approval(nonce)).await.unwrap(),
                Behavior::Deny => self
                    .channel
                    .publish(ConsentSignal::Failure {
                        reason: "access_denied".into(),
                        state: Some(nonce),
                    })
                    .await
                    .unwrap(),
                Behavior::ApproveViaStore(delay) => {
                    write_later(self.store.clone(), delay, approval(nonce))
                }
                Behavior::Ignore => {}
                Behavior::CloseAtOnce => closed_by_user = true,
                Behavior::CloseThenApprove(delay) => {
                    closed_by_user = true;
                    write_later(self.store.clone(), delay, approval(nonce));
                }
                Behavior::WrongNonce => self
                    .channel
                    .publish(approval("someone-else".into()))
                    .await
                    .unwrap(),
                Behavior::Block => return Err(SurfaceError::Blocked("popup blocked".into())),
                Behavior::Hang => std::future::pending::<()>().await,
            }

            Ok(Box::new(FakeHandle {
                closed_by_user,
                released: self.released.clone(),
            }))
        }
    }

    struct Harness {
        coordinator: Arc<ConsentCoordinator>,
        surface: Arc<FakeSurface>,
        tokens: Arc<TokenStore>,
        channel: ConsentChannel,
    }

    fn harness(behavior: Behavior) -> Harness {
        let start: DateTime<Utc> = DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start));
        let tokens = Arc::new(TokenStore::new(store.clone(), clock, TimeDelta::minutes(5)));
        let channel = ConsentChannel::new(store.clone());
        let surface = Arc::new(FakeSurface {
            behavior,
            channel: channel.clone(),
            store,
            opens: AtomicUsize::new(0),
            released: Arc::new(AtomicBool::new(false)),
        });
        let config = ConsentConfig {
            client_id: "client-123.apps.example.com".into(),
            ..ConsentConfig::default()
        };
        let coordinator = Arc::new(ConsentCoordinator::new(
            config,
            tokens.clone(),
            channel.clone(),
            surface.clone(),
        ));
        Harness {
            coordinator,
            surface,
            tokens,
            channel,
        }
    }

    #[test]
    fn valid_transitions() {
        use AttemptState::*;
        for (from, to) in [
            (Idle, AwaitingSignal),
            (AwaitingSignal, Succeeded),
            (AwaitingSignal, Failed),
            (AwaitingSignal, TimedOut),
            (Succeeded, Idle),
            (Failed, Idle),
            (TimedOut, Idle),
        ] {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use AttemptState::*;
        for (from, to) in [
            (Idle, Succeeded),
            (Idle, Idle),
            (AwaitingSignal, Idle),
            (Succeeded, Failed),
            (TimedOut, AwaitingSignal),
        ] {
            assert!(!from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[test]
    fn authorization_url_carries_grant_parameters() {
        let h = harness(Behavior::Ignore);
        let url = h.coordinator.authorization_url("nonce-1").unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert_eq!(params["client_id"], "client-123.apps.example.com");
        assert_eq!(params["response_type"], "token");
        assert_eq!(params["state"], "nonce-1");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8765/oauth/callback");
        assert_eq!(params["scope"], "https://www.googleapis.com/auth/gmail.send");
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_approval_stores_token() {
        let h = harness(Behavior::Approve);
        let token = h.coordinator.obtain().await.unwrap();

        assert_eq!(token.expose(), "ya29.granted");
        assert_eq!(h.tokens.get().await.unwrap().expose(), "ya29.granted");
        assert_eq!(h.coordinator.state(), AttemptState::Idle);
        // Cleanup removed the signal and released the surface.
        assert!(h.channel.read().await.unwrap().is_none());
        assert!(h.surface.released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn polled_approval_resolves_without_push() {
        let h = harness(Behavior::ApproveViaStore(Duration::from_secs(4)));
        let started = Instant::now();
        let token = h.coordinator.obtain().await.unwrap();

        assert_eq!(token.expose(), "ya29.granted");
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(4));
        assert!(waited < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn existing_token_skips_surface() {
        let h = harness(Behavior::Approve);
        h.tokens.put("ya29.cached", 3600).await.unwrap();

        let token = h.coordinator.obtain().await.unwrap();
        assert_eq!(token.expose(), "ya29.cached");
        assert_eq!(h.surface.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_maps_to_denied() {
        let h = harness(Behavior::Deny);
        let err = h.coordinator.obtain().await.unwrap_err();
        assert_eq!(err, AuthError::Denied("access_denied".into()));
        assert!(h.tokens.get().await.is_none());
        assert_eq!(h.coordinator.state(), AttemptState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_surface_fails_fast() {
        let h = harness(Behavior::Block);
        let err = h.coordinator.obtain().await.unwrap_err();
        assert!(matches!(err, AuthError::Blocked(_)));
        assert_eq!(h.coordinator.state(), AttemptState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_attempt_times_out() {
        let h = harness(Behavior::Ignore);
        let started = Instant::now();
        let err = h.coordinator.obtain().await.unwrap_err();

        assert_eq!(err, AuthError::Timeout(Duration::from_secs(300)));
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert!(h.surface.released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn surface_stuck_opening_still_times_out() {
        let h = harness(Behavior::Hang);
        let started = Instant::now();
        let err = h.coordinator.obtain().await.unwrap_err();

        assert_eq!(err, AuthError::Timeout(Duration::from_secs(300)));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(300), "{waited:?}");
        assert!(waited < Duration::from_secs(301), "{waited:?}");
        assert_eq!(h.surface.opens.load(Ordering::SeqCst), 1);
        assert_eq!(h.coordinator.state(), AttemptState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_tears_down_attempt() {
        let h = harness(Behavior::WrongNonce);
        let gave_up = tokio::time::timeout(Duration::from_secs(5), h.coordinator.obtain()).await;
        assert!(gave_up.is_err());

        // Let the spawned teardown run.
        sleep(Duration::from_millis(10)).await;

        assert_eq!(h.coordinator.state(), AttemptState::Idle);
        assert!(h.surface.released.load(Ordering::SeqCst));
        assert!(h.channel.read().await.unwrap().is_none());

        // The next caller starts a fresh attempt.
        h.tokens.put("ya29.cached", 3600).await.unwrap();
        assert_eq!(h.coordinator.obtain().await.unwrap().expose(), "ya29.cached");
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_nonce_is_ignored() {
        let h = harness(Behavior::WrongNonce);
        let err = h.coordinator.obtain().await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout(_)));
        assert!(h.tokens.get().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_surface_cancels_after_grace() {
        let h = harness(Behavior::CloseAtOnce);
        let started = Instant::now();
        let err = h.coordinator.obtain().await.unwrap_err();

        assert_eq!(err, AuthError::Cancelled);
        // 10 s before closure counts, then 15 s of grace.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(25), "{waited:?}");
        assert!(waited < Duration::from_secs(27), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn late_signal_during_grace_wins() {
        let h = harness(Behavior::CloseThenApprove(Duration::from_secs(20)));
        let token = h.coordinator.obtain().await.unwrap();
        assert_eq!(token.expose(), "ya29.granted");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_attempt() {
        let h = harness(Behavior::ApproveViaStore(Duration::from_secs(2)));
        let (a, b) = tokio::join!(h.coordinator.obtain(), h.coordinator.obtain());

        assert_eq!(a.unwrap().expose(), "ya29.granted");
        assert_eq!(b.unwrap().expose(), "ya29.granted");
        assert_eq!(h.surface.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_cleanup_is_idempotent() {
        let h = harness(Behavior::Ignore);
        h.channel.publish(approval("x".into())).await.unwrap();

        let released = Arc::new(AtomicBool::new(false));
        let mut attempt = ConsentAttempt::new(
            h.channel.clone(),
            Box::new(FakeHandle {
                closed_by_user: false,
                released: released.clone(),
            }),
        );
        attempt.cleanup().await;
        attempt.cleanup().await;

        assert!(released.load(Ordering::SeqCst));
        assert!(h.channel.read().await.unwrap().is_none());
    }
}
