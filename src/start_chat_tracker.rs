//! Startup helpers for the tracker and the chat-status server binaries.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;

use crate::config::TrackerConfig;
use crate::local_cache::SqliteLocalStore;
use crate::remote::HttpChatRemote;
use crate::server::{self, AppState};
use crate::session::SyncSession;
use crate::types::{Conversation, SyncEvent};

/// Conversation the tracker binary follows, if set.
pub const SELECT_ENV: &str = "CHAT_TRACKER_SELECT";
/// Port of the chat-status server.
pub const PORT_ENV: &str = "CHAT_STATUS_PORT";
/// Database path of the chat-status server.
pub const DB_PATH_ENV: &str = "CHAT_STATUS_DB_PATH";

const DEFAULT_DB_PATH: &str = "chat_status.sqlite3";

/// Install the `tracing` subscriber (`RUST_LOG` plus an `INFO` floor).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

/// Run the tracker until Ctrl-C (used by the `chat-tracker` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run_tracker() -> ExitCode {
    init_tracing();
    tracing::info!("Starting chat tracker v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(track_until_shutdown(shutdown_signal())) {
        tracing::error!("Tracker error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Build a session from the environment, follow it until `shutdown_signal`
/// completes, then tear it down.
///
/// # Errors
/// Returns an error if the configuration or the local cache is unusable.
pub async fn track_until_shutdown<F>(shutdown_signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let config = TrackerConfig::from_env().context("invalid tracker configuration")?;
    tracing::info!(webhook = %config.webhook_url, status_api = %config.status_api_base, "Configuration loaded");

    let local = SqliteLocalStore::open(&config.cache_path)
        .await
        .with_context(|| format!("cannot open cache at {}", config.cache_path.display()))?;
    let remote = HttpChatRemote::new(&config).context("cannot build HTTP client")?;

    let session = SyncSession::new(&config, Arc::new(remote), Arc::new(local));
    let mut events = session.subscribe();
    session.start().await;

    if let Some(chat_id) = std::env::var(SELECT_ENV).ok().filter(|id| !id.is_empty()) {
        session.select(&chat_id).await;
    }

    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            () = &mut shutdown_signal => break,
            event = events.recv() => match event {
                Ok(event) => log_event(&session, &event).await,
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn log_event(session: &SyncSession, event: &SyncEvent) {
    match event {
        SyncEvent::ChatListChanged => {
            let view = session.chat_view("");
            let unread: u32 = view.iter().map(|c| c.unread_count).sum();
            let newest = view.first().map(Conversation::label).unwrap_or_default();
            tracing::info!(conversations = view.len(), unread, newest, "Chat list updated");
        }
        SyncEvent::MessagesChanged { conversation_id } => {
            let messages = session.messages().await;
            let latest = messages.last().map(|m| m.message.text.as_str()).unwrap_or_default();
            tracing::info!(chat_id = %conversation_id, count = messages.len(), latest, "Messages updated");
        }
        SyncEvent::DeliveryChanged {
            conversation_id,
            local_id,
            state,
        } => {
            tracing::info!(chat_id = %conversation_id, %local_id, ?state, "Delivery resolved");
        }
    }
}

/// Run the chat-status server (used by the `chat-status-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run_status_server() -> ExitCode {
    init_tracing();
    tracing::info!("Starting chat status server v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let db_path = std::env::var(DB_PATH_ENV).unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let port = get_port();

    let result = rt.block_on(async {
        let state = AppState::open(&db_path).await?;
        server::run_server_with_shutdown(state, port, shutdown_signal()).await
    });

    if let Err(err) = result {
        tracing::error!(?err, %port, "Chat status server failed");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Get configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
