//! Consent surfaces: where the user sees the provider's authorization page.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::AuthError;

/// Failure to present the consent page.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("Launcher could not be started: {0}")]
    LaunchFailed(String),

    #[error("Surface was blocked: {0}")]
    Blocked(String),
}

impl From<SurfaceError> for AuthError {
    fn from(e: SurfaceError) -> Self {
        AuthError::Blocked(e.to_string())
    }
}

/// Opens a consent page.
#[async_trait]
pub trait ConsentSurface: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn SurfaceHandle>, SurfaceError>;
}

/// A live consent page.
#[async_trait]
pub trait SurfaceHandle: Send + Sync {
    /// Whether the user closed the page.
    fn is_closed(&self) -> bool;

    /// Close the page. Calling this more than once is a no-op.
    async fn close(&self);
}

/// Launches the system browser on the authorization URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserSurface;

impl BrowserSurface {
    fn launcher(url: &str) -> Command {
        #[cfg(target_os = "macos")]
        {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            cmd
        }
        #[cfg(target_os = "windows")]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", "", url]);
            cmd
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            cmd
        }
    }
}

#[async_trait]
impl ConsentSurface for BrowserSurface {
    async fn open(&self, url: &str) -> Result<Box<dyn SurfaceHandle>, SurfaceError> {
        let status = Self::launcher(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| SurfaceError::LaunchFailed(e.to_string()))?;

        if !status.success() {
            return Err(SurfaceError::Blocked(format!("launcher exited with {status}")));
        }

        info!("Opened consent page in the system browser");
        Ok(Box::new(BrowserHandle::default()))
    }
}

/// The browser gives no closure feedback, so this reports open until
/// the coordinator closes it.
#[derive(Debug, Default)]
pub struct BrowserHandle {
    closed: AtomicBool,
}

#[async_trait]
impl SurfaceHandle for BrowserHandle {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Consent page released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn browser_handle_close_is_idempotent() {
        let handle = BrowserHandle::default();
        assert!(!handle.is_closed());
        handle.close().await;
        handle.close().await;
        assert!(handle.is_closed());
    }

    #[test]
    fn surface_errors_map_to_blocked() {
        let err: AuthError = SurfaceError::LaunchFailed("no such file".into()).into();
        assert!(matches!(err, AuthError::Blocked(msg) if msg.contains("no such file")));
    }
}
