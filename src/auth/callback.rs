//! Landing routes for the provider redirect.
//!
//! The provider returns the token in the URL fragment, which never reaches the
//! server. `GET /oauth/callback` serves a page that reads the fragment and
//! posts it to `POST /oauth/complete`, which publishes the consent signal.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::signal::{ConsentChannel, ConsentSignal};

/// Lifetime assumed when the fragment carries no `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

const LANDING_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Authorization complete</title></head>
<body>
<p id="status">Finishing authorization&hellip;</p>
<script>
(function () {
  var params = new URLSearchParams(window.location.hash.substring(1));
  var payload = {
    access_token: params.get("access_token"),
    expires_in: params.get("expires_in") ? parseInt(params.get("expires_in"), 10) : null,
    state: params.get("state"),
    error: params.get("error")
  };
  fetch("/oauth/complete", {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify(payload)
  }).then(function () {
    document.getElementById("status").textContent = "You can close this window.";
    window.close();
  }).catch(function () {
    document.getElementById("status").textContent = "Could not reach the app. Close this window and try again.";
  });
})();
</script>
</body>
</html>
"#;

/// Shared state for the landing routes.
#[derive(Clone)]
pub struct CallbackState {
    pub channel: ConsentChannel,
}

/// Fragment parameters forwarded by the landing page.
#[derive(Debug, Default, Deserialize)]
pub struct CompletionPayload {
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CompletionPayload {
    /// The signal this payload describes, or `None` when it has neither a
    /// token nor an error. An error wins over a token.
    pub fn into_signal(self) -> Option<ConsentSignal> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        if let Some(reason) = non_empty(self.error) {
            return Some(ConsentSignal::Failure {
                reason,
                state: self.state,
            });
        }
        non_empty(self.access_token).map(|access_token| ConsentSignal::Success {
            access_token,
            expires_in: self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            state: self.state,
        })
    }
}

/// GET /oauth/callback
async fn landing() -> impl IntoResponse {
    Html(LANDING_PAGE)
}

/// POST /oauth/complete
async fn complete(
    State(state): State<CallbackState>,
    Json(payload): Json<CompletionPayload>,
) -> impl IntoResponse {
    let Some(signal) = payload.into_signal() else {
        warn!("Rejected consent completion without token or error");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "expected access_token or error"})),
        )
            .into_response();
    };

    info!(signal = ?signal, "Consent completion received");
    match state.channel.publish(signal).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Build the landing routes.
pub fn callback_routes(channel: ConsentChannel) -> Router {
    Router::new()
        .route("/oauth/callback", get(landing))
        .route("/oauth/complete", post(complete))
        .layer(TraceLayer::new_for_http())
        .with_state(CallbackState { channel })
}
