//! Fakes shared by the dispatch unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::engine::DispatchEngine;
use super::outcome::{DispatchRequest, OwnerProfile};
use crate::auth::{AccessToken, ConsentFlow, TokenStore};
use crate::clock::ManualClock;
use crate::error::{AuthError, TransportError};
use crate::limits::{CooldownTracker, QuotaLedger, SuppressionList};
use crate::mail::MailTransport;
use crate::observer::NoopObserver;
use crate::store::{DocumentStore, MemoryStore};

pub fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Transport that records every call and replays scripted responses.
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<(String, String)>>,
    script: Mutex<VecDeque<Result<String, TransportError>>>,
}

impl RecordingTransport {
    pub fn push(&self, response: Result<String, TransportError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, token: &AccessToken, raw: &str) -> Result<String, TransportError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((token.expose().to_string(), raw.to_string()));
            calls.len()
        };
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("msg-{n}")))
    }
}

/// Consent flow that answers instantly, caching the token like the real one.
pub struct InstantConsent {
    tokens: Arc<TokenStore>,
    pub calls: AtomicUsize,
    pub fail_with: Mutex<Option<AuthError>>,
}

#[async_trait]
impl ConsentFlow for InstantConsent {
    async fn obtain(&self) -> Result<AccessToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(match self.tokens.put("ya29.granted", 3600).await {
            Ok(token) => token,
            Err(_) => self.tokens.mint("ya29.granted", 3600),
        })
    }
}

pub struct Fixture {
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<ManualClock>,
    pub tokens: Arc<TokenStore>,
    pub consent: Arc<InstantConsent>,
    pub transport: Arc<RecordingTransport>,
    pub engine: Arc<DispatchEngine>,
}

impl Fixture {
    pub fn new(ceiling: u32) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), ceiling)
    }

    pub fn with_store(store: Arc<dyn DocumentStore>, ceiling: u32) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let tokens = Arc::new(TokenStore::new(
            store.clone(),
            clock.clone(),
            TimeDelta::minutes(5),
        ));
        let consent = Arc::new(InstantConsent {
            tokens: tokens.clone(),
            calls: AtomicUsize::new(0),
            fail_with: Mutex::new(None),
        });
        let transport = Arc::new(RecordingTransport::default());
        let engine = Arc::new(DispatchEngine::new(
            tokens.clone(),
            consent.clone(),
            Arc::new(QuotaLedger::new(store.clone(), clock.clone(), ceiling)),
            Arc::new(CooldownTracker::new(
                store.clone(),
                clock.clone(),
                TimeDelta::days(14),
            )),
            Arc::new(SuppressionList::new(store.clone(), clock.clone())),
            transport.clone(),
            Arc::new(NoopObserver),
        ));
        Self {
            store,
            clock,
            tokens,
            consent,
            transport,
            engine,
        }
    }
}

pub fn owner() -> OwnerProfile {
    OwnerProfile {
        owner_id: "u1".into(),
        display_name: "Ada Lovelace".into(),
        email: "ada@example.com".into(),
    }
}

pub fn request(target_id: &str, recipient: &str) -> DispatchRequest {
    DispatchRequest {
        target_id: target_id.into(),
        target_name: target_id.to_uppercase(),
        recipient_address: recipient.into(),
        subject: "Following up on my application".into(),
        body: "Hi, I wanted to check in.".into(),
        owner: owner(),
    }
}
