//! Error types for nudge-dispatch.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document store errors.
///
/// Never surfaced on the send path: quota, cooldown and suppression checks
/// log these and fail open.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Failures of the interactive consent flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization was cancelled")]
    Cancelled,

    #[error("Authorization timed out after {0:?}")]
    Timeout(Duration),

    #[error("Consent window could not be opened: {0}")]
    Blocked(String),

    #[error("Authorization denied by provider: {0}")]
    Denied(String),
}

/// Errors returned by the mail-provider transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Access token rejected by provider")]
    AuthExpired,

    #[error("Provider rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Provider request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),
}

/// Per-send failure carried by `DispatchOutcome::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Access token expired or was revoked")]
    AuthExpired,

    #[error("Daily send limit of {ceiling} reached")]
    QuotaExceeded { ceiling: u32 },

    #[error("Provider rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Send timed out")]
    Timeout,

    #[error("Could not build message: {0}")]
    Envelope(String),
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::AuthExpired => Self::AuthExpired,
            TransportError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            TransportError::Provider { status, message } => Self::Provider {
                message: format!("{status}: {message}"),
            },
            TransportError::Timeout => Self::Timeout,
            TransportError::Network(message) => Self::Provider { message },
        }
    }
}

impl DispatchError {
    /// Text to show the end user. Always names an action they can take.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(AuthError::Blocked(_)) => {
                "The sign-in window was blocked. Allow pop-ups for this site and try again.".into()
            }
            Self::Auth(AuthError::Cancelled) => {
                "Sign-in was cancelled. Try again when you're ready to grant access.".into()
            }
            Self::Auth(AuthError::Timeout(_)) => {
                "Sign-in took too long. Try again and finish the consent step.".into()
            }
            Self::Auth(AuthError::Denied(_)) => {
                "Access was not granted. Try again and approve the requested permission.".into()
            }
            Self::AuthExpired => "Your mail session expired. Sign in again to continue.".into(),
            Self::QuotaExceeded { ceiling } => {
                format!("You've reached today's limit of {ceiling} messages. Try again tomorrow.")
            }
            Self::RateLimited { .. } | Self::Timeout => {
                "The mail provider is busy. Wait a moment and try again.".into()
            }
            Self::Provider { message } => format!("The mail provider rejected the message: {message}"),
            Self::Envelope(message) => format!("The message could not be prepared: {message}"),
        }
    }

    /// Whether a caller-level retry may succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
