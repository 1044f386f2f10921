//! MangaHub realtime server: sync (TCP), notifications (UDP) and chat
//! (WebSocket) in one process.
//!
//! Usage: `mangahub-server [config.json]`

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use mangahub_core::{MemoryStore, ProgressStore};
use mangahub_realtime::{ChatServer, NotifyServer, RocksProgressStore, ServerError, SyncServer};
use tokio::task::JoinSet;

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AppConfig::load_or_default(&path).with_env(|key| std::env::var(key).ok());

    log::info!("Starting MangaHub realtime server...");
    match run(config).await {
        Ok(()) => {
            log::info!("MangaHub realtime server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn ProgressStore> = match config.storage {
        Some(store_config) => Arc::new(RocksProgressStore::open(store_config)?),
        None => {
            log::warn!("No storage configured; progress is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let sync = Arc::new(SyncServer::new(config.sync).with_store(store));
    let notify = Arc::new(NotifyServer::bind(config.notify).await?);
    let chat = Arc::new(ChatServer::new(config.chat));

    let mut servers: JoinSet<(&'static str, Result<(), ServerError>)> = JoinSet::new();
    {
        let sync = sync.clone();
        servers.spawn(async move { ("sync", sync.run().await) });
        let notify = notify.clone();
        servers.spawn(async move { ("notify", notify.run().await) });
        let chat = chat.clone();
        servers.spawn(async move { ("chat", chat.run().await) });
    }

    let mut failure = None;
    tokio::select! {
        _ = shutdown_signal() => log::info!("Shutdown signal received"),
        Some(joined) = servers.join_next() => {
            failure = exit_error(joined);
        }
    }

    sync.shutdown().await;
    notify.shutdown().await;
    chat.shutdown();

    while let Some(joined) = servers.join_next().await {
        if let Some(e) = exit_error(joined) {
            failure.get_or_insert(e);
        }
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Log how a server task ended; return its error, if any.
fn exit_error(
    joined: Result<(&'static str, Result<(), ServerError>), tokio::task::JoinError>,
) -> Option<String> {
    match joined {
        Ok((name, Ok(()))) => {
            log::debug!("{name} server exited");
            None
        }
        Ok((name, Err(e))) => {
            log::error!("{name} server failed: {e}");
            Some(format!("{name} server failed: {e}"))
        }
        Err(e) => {
            log::error!("Server task panicked: {e}");
            Some(e.to_string())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
