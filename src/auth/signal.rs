//! Consent signals: how the landing step reports back to the coordinator.
//!
//! Every signal is written to a durable key (polled by the coordinator) and
//! broadcast in-process (pushed to a live subscriber). Either path alone is
//! enough to resolve an attempt.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{DocumentStore, get_doc, put_doc};

/// Durable location of the latest consent signal.
pub const SIGNAL_KEY: &str = "auth:consent_signal";

const BROADCAST_CAPACITY: usize = 16;

/// Outcome reported by the landing step.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConsentSignal {
    Success {
        access_token: String,
        expires_in: u64,
        state: Option<String>,
    },
    Failure {
        reason: String,
        state: Option<String>,
    },
}

impl ConsentSignal {
    pub fn state(&self) -> Option<&str> {
        match self {
            Self::Success { state, .. } | Self::Failure { state, .. } => state.as_deref(),
        }
    }

    /// Whether this signal belongs to the attempt that issued `nonce`.
    pub fn matches(&self, nonce: &str) -> bool {
        self.state() == Some(nonce)
    }
}

impl fmt::Debug for ConsentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success {
                expires_in, state, ..
            } => f
                .debug_struct("Success")
                .field("access_token", &"[REDACTED]")
                .field("expires_in", expires_in)
                .field("state", state)
                .finish(),
            Self::Failure { reason, state } => f
                .debug_struct("Failure")
                .field("reason", reason)
                .field("state", state)
                .finish(),
        }
    }
}

/// Push + durable signal channel shared by the landing routes and the coordinator.
#[derive(Clone)]
pub struct ConsentChannel {
    tx: broadcast::Sender<ConsentSignal>,
    store: Arc<dyn DocumentStore>,
}

impl ConsentChannel {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx, store }
    }

    /// Subscribe to pushed signals.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsentSignal> {
        self.tx.subscribe()
    }

    /// Persist and broadcast a signal.
    ///
    /// Fails only when neither path delivered: the write failed and nobody
    /// was subscribed.
    pub async fn publish(&self, signal: ConsentSignal) -> Result<(), StoreError> {
        let written = put_doc(self.store.as_ref(), SIGNAL_KEY, &signal).await;
        if let Err(ref e) = written {
            warn!(error = %e, "Failed to persist consent signal");
        }

        let pushed = self.tx.send(signal).is_ok();
        debug!(pushed, persisted = written.is_ok(), "Consent signal published");

        match written {
            Err(e) if !pushed => Err(e),
            _ => Ok(()),
        }
    }

    /// Read the durable signal, if one is waiting.
    pub async fn read(&self) -> Result<Option<ConsentSignal>, StoreError> {
        get_doc(self.store.as_ref(), SIGNAL_KEY).await
    }

    /// Remove the durable signal.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(SIGNAL_KEY).await?;
        Ok(())
    }
}
