//! Token store: expiry-aware cache of the delegated access token.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{DocumentStore, get_doc, put_doc};

/// Durable key holding the cached token.
pub const TOKEN_KEY: &str = "auth:access_token";

/// Upper bound on a provider-reported lifetime (one day).
const MAX_TTL_SECS: i64 = 24 * 60 * 60;

/// A delegated access token and its expiry.
pub struct AccessToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at,
        }
    }

    /// The raw bearer value. Only the transport should call this.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Clone for AccessToken {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_owned(), self.expires_at)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// On-disk shape of the cached token.
#[derive(Serialize, Deserialize)]
struct StoredToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Caches the token in the document store.
///
/// `get` never returns a token that expires within `buffer`; such a token is
/// purged on read.
pub struct TokenStore {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    buffer: TimeDelta,
}

impl TokenStore {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, buffer: TimeDelta) -> Self {
        Self {
            store,
            clock,
            buffer,
        }
    }

    /// A usable token, or `None`. Read errors count as "no token".
    pub async fn get(&self) -> Option<AccessToken> {
        let stored = match get_doc::<StoredToken>(self.store.as_ref(), TOKEN_KEY).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Token read failed");
                return None;
            }
        };

        if stored.expires_at - self.clock.now() < self.buffer {
            debug!(expires_at = %stored.expires_at, "Cached token inside expiry buffer, purging");
            if let Err(e) = self.clear().await {
                warn!(error = %e, "Failed to purge expiring token");
            }
            return None;
        }

        Some(AccessToken::new(stored.value, stored.expires_at))
    }

    /// Build a token expiring `ttl_seconds` from now, without persisting it.
    pub fn mint(&self, value: &str, ttl_seconds: u64) -> AccessToken {
        let secs = i64::try_from(ttl_seconds).unwrap_or(MAX_TTL_SECS).min(MAX_TTL_SECS);
        let ttl = TimeDelta::seconds(secs);
        AccessToken::new(value, self.clock.now() + ttl)
    }

    /// Cache a token valid for `ttl_seconds`.
    pub async fn put(&self, value: &str, ttl_seconds: u64) -> Result<AccessToken, StoreError> {
        let token = self.mint(value, ttl_seconds);
        let stored = StoredToken {
            value: value.to_string(),
            expires_at: token.expires_at,
        };
        put_doc(self.store.as_ref(), TOKEN_KEY, &stored).await?;
        debug!(expires_at = %token.expires_at, "Access token cached");
        Ok(token)
    }

    /// Forget the cached token.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(TOKEN_KEY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, UnavailableStore};

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn token_store() -> (TokenStore, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let tokens = TokenStore::new(store.clone(), clock.clone(), TimeDelta::minutes(5));
        (tokens, clock, store)
    }

    #[tokio::test]
    async fn empty_store_has_no_token() {
        let (tokens, _, _) = token_store();
        assert!(tokens.get().await.is_none());
    }

    #[tokio::test]
    async fn put_then_get() {
        let (tokens, _, _) = token_store();
        let put = tokens.put("ya29.token", 3600).await.unwrap();
        assert_eq!(put.expires_at(), start() + TimeDelta::hours(1));

        let got = tokens.get().await.unwrap();
        assert_eq!(got.expose(), "ya29.token");
        assert_eq!(got.expires_at(), start() + TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn token_inside_buffer_is_absent_and_purged() {
        let (tokens, clock, store) = token_store();
        tokens.put("ya29.token", 3600).await.unwrap();

        // 6 minutes left: still usable.
        clock.advance(TimeDelta::minutes(54));
        assert!(tokens.get().await.is_some());

        // 4m59s left: not yet expired, but inside the buffer.
        clock.advance(TimeDelta::minutes(1) + TimeDelta::seconds(1));
        assert!(tokens.get().await.is_none());
        assert!(store.get(TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_token() {
        let (tokens, _, _) = token_store();
        tokens.put("ya29.token", 3600).await.unwrap();
        tokens.clear().await.unwrap();
        assert!(tokens.get().await.is_none());
    }

    #[tokio::test]
    async fn token_survives_a_new_store_handle() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        TokenStore::new(store.clone(), clock.clone(), TimeDelta::minutes(5))
            .put("ya29.token", 3600)
            .await
            .unwrap();

        let reopened = TokenStore::new(store, clock, TimeDelta::minutes(5));
        assert_eq!(reopened.get().await.unwrap().expose(), "ya29.token");
    }

    #[tokio::test]
    async fn read_errors_mean_no_token() {
        let clock = Arc::new(ManualClock::new(start()));
        let tokens = TokenStore::new(Arc::new(UnavailableStore), clock, TimeDelta::minutes(5));
        assert!(tokens.get().await.is_none());
        assert!(tokens.put("x", 60).await.is_err());
    }

    #[test]
    fn debug_redacts_value() {
        let token = AccessToken::new("ya29.secret", start());
        let printed = format!("{token:?}");
        assert!(!printed.contains("ya29.secret"));
        assert!(printed.contains("REDACTED"));
    }
}
