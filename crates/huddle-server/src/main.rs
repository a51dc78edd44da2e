//! # huddle-server
//!
//! HTTP backend for the Huddle chat room.
//!
//! This binary provides:
//! - **Presence** derived from client heartbeats (no persistent connections)
//! - **Room messages** with replies, reactions, edit/delete and locking
//! - **Direct messages** gated by a request/accept handshake
//! - **Polls** attached to room messages
//! - **Ephemeral file uploads** swept after their time to live
//! - **Admin API** behind a bearer token

mod api;
mod chat;
mod config;
mod error;
mod uploads;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use huddle_store::Database;

use crate::api::AppState;
use crate::chat::Chat;
use crate::config::ServerConfig;
use crate::uploads::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,huddle_server=debug,huddle_store=debug")
            }),
        )
        .init();

    info!("Starting Huddle server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        admin_enabled = config.admin_token.is_some(),
        active_window_secs = config.active_window.as_secs(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_in_memory()?,
    };
    let window = chrono::Duration::from_std(config.active_window)?;
    let chat = Arc::new(Mutex::new(Chat::new(db, window)));

    // Upload store (creates directory if missing)
    let uploads = Arc::new(
        UploadStore::new(config.upload_dir.clone(), config.max_upload_size).await?,
    );

    let app_state = AppState {
        chat: chat.clone(),
        uploads: uploads.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    tokio::spawn(sweep_loop(chat, uploads, config.sweep_interval));

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

/// Periodically drop expired files (records, then bytes) and stale
/// presence entries.
async fn sweep_loop(chat: Arc<Mutex<Chat>>, uploads: Arc<UploadStore>, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;

        let report = match chat.lock().await.sweep(Utc::now()) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Sweep failed");
                continue;
            }
        };

        for record in &report.expired_files {
            if let Err(e) = uploads.remove(&record.filename).await {
                warn!(file_id = %record.id, error = %e, "Failed to remove expired upload");
            }
        }

        if !report.expired_files.is_empty() || report.stale_presence > 0 {
            debug!(
                expired_files = report.expired_files.len(),
                stale_presence = report.stale_presence,
                "Sweep finished"
            );
        }
    }
}
