//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

use crate::error::ConfigError;

/// Google OAuth authorization endpoint used for the implicit grant.
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Scope needed to send mail on the user's behalf (and nothing else).
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

/// Gmail REST endpoint for sending a raw RFC 5322 message.
pub const DEFAULT_SEND_ENDPOINT: &str =
    "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct NudgeConfig {
    pub limits: LimitsConfig,
    pub consent: ConsentConfig,
    pub batch: BatchConfig,
    pub retry: RetryPolicy,
    /// Endpoint the mail transport posts to.
    pub send_endpoint: String,
    /// Per-request timeout for the provider send call.
    pub send_timeout: Duration,
    /// A cached token closer than this to expiry is treated as absent.
    pub token_expiry_buffer: TimeDelta,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            consent: ConsentConfig::default(),
            batch: BatchConfig::default(),
            retry: RetryPolicy::default(),
            send_endpoint: DEFAULT_SEND_ENDPOINT.to_string(),
            send_timeout: Duration::from_secs(30),
            token_expiry_buffer: TimeDelta::minutes(5),
            db_path: PathBuf::from("./data/nudge.db"),
        }
    }
}

impl NudgeConfig {
    /// Build config from `NUDGE_*` environment variables on top of the defaults.
    ///
    /// `NUDGE_CLIENT_ID` is required; everything else is optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.consent.client_id = std::env::var("NUDGE_CLIENT_ID")
            .map_err(|_| ConfigError::MissingEnvVar("NUDGE_CLIENT_ID".into()))?;
        if let Ok(scope) = std::env::var("NUDGE_SCOPE") {
            config.consent.scope = scope;
        }
        if let Some(port) = env_parse::<u16>("NUDGE_REDIRECT_PORT")? {
            config.consent.redirect_port = port;
        }
        if let Some(secs) = env_parse::<u64>("NUDGE_CONSENT_TIMEOUT_SECS")? {
            config.consent.hard_timeout = Duration::from_secs(secs);
        }
        if let Some(ceiling) = env_parse::<u32>("NUDGE_DAILY_CEILING")? {
            config.limits.daily_ceiling = ceiling;
        }
        if let Some(days) = env_parse::<i64>("NUDGE_COOLDOWN_DAYS")? {
            config.limits.cooldown_window = cooldown_window(days)?;
        }
        if let Some(ms) = env_parse::<u64>("NUDGE_BATCH_DELAY_MS")? {
            config.batch.item_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("NUDGE_SEND_TIMEOUT_SECS")? {
            config.send_timeout = Duration::from_secs(secs);
        }
        if let Ok(endpoint) = std::env::var("NUDGE_SEND_ENDPOINT") {
            config.send_endpoint = endpoint;
        }
        if let Ok(path) = std::env::var("NUDGE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        Ok(config)
    }
}

/// Sending limits.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Maximum sends per owner per calendar day (UTC).
    pub daily_ceiling: u32,
    /// Minimum time between two sends from one owner to one target.
    pub cooldown_window: TimeDelta,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily_ceiling: 100,
            cooldown_window: TimeDelta::days(14),
        }
    }
}

/// Interactive consent flow settings.
#[derive(Debug, Clone)]
pub struct ConsentConfig {
    /// OAuth client identity.
    pub client_id: String,
    /// Space-separated scopes requested from the provider.
    pub scope: String,
    /// Provider authorization page.
    pub auth_endpoint: String,
    /// Local port the landing callback listens on.
    pub redirect_port: u16,
    /// Give up on the attempt after this long, whatever the surface is doing.
    pub hard_timeout: Duration,
    /// Surface closure is not trusted before this much time has passed.
    pub min_before_close_check: Duration,
    /// How long to keep polling after the surface was seen closed.
    pub close_grace: Duration,
    /// Interval of the durable signal poll.
    pub poll_interval: Duration,
}

impl ConsentConfig {
    /// Where the provider sends the user back after consent.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/oauth/callback", self.redirect_port)
    }
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            scope: DEFAULT_SCOPE.to_string(),
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            redirect_port: 8765,
            hard_timeout: Duration::from_secs(300),         // 5 minutes
            min_before_close_check: Duration::from_secs(10),
            close_grace: Duration::from_secs(15),
            poll_interval: Duration::from_millis(300),
        }
    }
}

/// Batch run settings.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Pause between consecutive items, to stay under provider rate limits.
    pub item_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            item_delay: Duration::from_millis(1500),
        }
    }
}

/// Retry policy for single sends that hit transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), before jitter.
    ///
    /// A provider-supplied `retry_after` wins when it is longer.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let computed = self.initial_delay.mul_f64(factor).min(self.max_delay);
        match retry_after {
            Some(hint) => computed.max(hint.min(self.max_delay)),
            None => computed,
        }
    }

    /// `delay_for` plus up to 10% random jitter.
    pub fn jittered_delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.delay_for(attempt, retry_after);
        let jitter: f64 = rand::random::<f64>() * 0.1;
        base.mul_f64(1.0 + jitter)
    }
}

/// Parse an optional env var, rejecting values that are set but malformed.
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Validate a cooldown length in whole days.
fn cooldown_window(days: i64) -> Result<TimeDelta, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: "NUDGE_COOLDOWN_DAYS".into(),
        message: format!("{days}: {message}"),
    };
    if days <= 0 {
        return Err(invalid("must be at least one day"));
    }
    TimeDelta::try_days(days).ok_or_else(|| invalid("out of range"))
}
