use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nudge_dispatch::auth::BrowserSurface;
use nudge_dispatch::clock::SystemClock;
use nudge_dispatch::config::NudgeConfig;
use nudge_dispatch::dispatch::{BatchCancel, BatchTarget, OwnerProfile};
use nudge_dispatch::error::ConfigError;
use nudge_dispatch::mail::GmailTransport;
use nudge_dispatch::observer::TracingObserver;
use nudge_dispatch::service::{NudgeService, ServiceDeps};
use nudge_dispatch::store::LibSqlStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing();

    let targets_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("Usage: nudge-dispatch <targets.json>");
            std::process::exit(2);
        }
    };

    let config = NudgeConfig::from_env().context("loading configuration")?;
    let owner = owner_from_env()?;

    let raw = tokio::fs::read_to_string(&targets_path)
        .await
        .with_context(|| format!("reading {}", targets_path.display()))?;
    let targets: Vec<BatchTarget> =
        serde_json::from_str(&raw).context("parsing targets file")?;
    if targets.is_empty() {
        bail!("{} contains no targets", targets_path.display());
    }

    eprintln!("📨 nudge-dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Owner: {} <{}>", owner.display_name, owner.email);
    eprintln!("   Targets: {}", targets.len());
    eprintln!("   Callback: {}", config.consent.redirect_uri());

    // ── Database ─────────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    let transport = Arc::new(GmailTransport::new(
        config.send_endpoint.clone(),
        config.send_timeout,
    )?);

    let service = NudgeService::new(
        &config,
        ServiceDeps {
            store,
            clock: Arc::new(SystemClock),
            surface: Arc::new(BrowserSurface),
            transport,
            observer: Arc::new(TracingObserver),
        },
    );

    // ── Callback server ──────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.consent.redirect_port))
        .await
        .with_context(|| format!("binding callback port {}", config.consent.redirect_port))?;
    let router = service.callback_router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Callback server stopped");
        }
    });

    let cancel = BatchCancel::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current item…");
            on_ctrl_c.cancel();
        }
    });

    eprintln!(
        "   Remaining today: {}\n",
        service.remaining_today(&owner.owner_id).await
    );

    let result = service
        .run_batch(&owner, &targets, &cancel, |p| {
            let detail = p.detail.as_deref().unwrap_or("");
            eprintln!(
                "[{}/{}] {:<30} {:?} {}",
                p.current, p.total, p.target_name, p.status, detail
            );
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("NUDGE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "nudge-dispatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn owner_from_env() -> Result<OwnerProfile, ConfigError> {
    let var = |key: &str| {
        std::env::var(key)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    };
    Ok(OwnerProfile {
        owner_id: var("NUDGE_OWNER_ID")?,
        display_name: std::env::var("NUDGE_OWNER_NAME").unwrap_or_default(),
        email: var("NUDGE_OWNER_EMAIL")?,
    })
}
