//! HeartSync Coordinator - match lifecycle coordination for the HeartSync dApp
//!
//! Keeps the local view of a participant's match in step with the on-chain
//! profile manager, matchmaker and escrow contracts, and drives the user's
//! mutations (mint, join, deposit, accept, exchange) through to confirmation.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

mod api;
mod config;
mod coordinator;
mod error;
mod events;
mod ids;
mod ledger;
mod metrics;
mod notify;
mod reader;
mod session;
mod store;
mod tracker;

#[cfg(test)]
mod testing;

use config::Settings;
use coordinator::{Coordinator, CoordinatorHandle};
use events::EventListener;
use ledger::{EvmLedgerClient, LedgerClient};
use metrics::MetricsServer;
use notify::BufferedNotifier;
use session::{load_wallet, IdentityProvider, WalletIdentity};
use store::{DurableStore, SqliteBackend};

const NOTIFICATION_HISTORY: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting HeartSync Coordinator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let deposit_wei = settings.escrow.deposit_amount()?;
    info!(
        "Loaded configuration for chain {} ({} RPC endpoints)",
        settings.ledger.chain_id,
        settings.ledger.rpc_urls.len()
    );

    // Open local persistence
    let backend = SqliteBackend::open(&settings.store)
        .await
        .context("Failed to open local store")?;
    backend.run_migrations().await?;
    backend
        .health_check()
        .await
        .context("Local store failed health check")?;
    info!("Local store ready at {}", settings.store.path);
    let store = DurableStore::new(Arc::new(backend));

    // The wallet is optional: without one the coordinator serves a signed-out view
    let wallet = match load_wallet(&settings.session.private_key_env) {
        Ok(wallet) => Some(wallet),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };

    let ledger: Arc<dyn LedgerClient> =
        Arc::new(EvmLedgerClient::new(settings.ledger.clone(), wallet.clone())?);
    let identity = Arc::new(WalletIdentity::new(wallet));
    let notifications = Arc::new(BufferedNotifier::new(NOTIFICATION_HISTORY));
    info!("Ledger client initialized");

    let buffer = settings.coordinator.channel_buffer;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(buffer);
    let (batch_tx, batch_rx) = mpsc::channel(buffer);
    let (listener_tx, listener_rx) = mpsc::channel(buffer);

    let coordinator = Coordinator::new(
        identity.clone(),
        ledger.clone(),
        store,
        notifications.clone(),
        deposit_wei,
        listener_tx,
    );
    let handle = CoordinatorHandle::new(command_tx);

    // Start event listener
    let listener_handle = tokio::spawn({
        let listener = EventListener::new(settings.listener.clone(), ledger.clone(), batch_tx);
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = listener.run(listener_rx, shutdown).await {
                error!("Event listener error: {}", e);
            }
        }
    });

    // Start coordinator
    let coordinator_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = coordinator.run(command_rx, batch_rx, shutdown).await {
                error!("Coordinator error: {}", e);
            }
        }
    });

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = api::AppState {
            coordinator: handle.clone(),
            notifications: notifications.clone(),
        };
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = api::run_server(config, state, shutdown).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    if settings.coordinator.auto_login && identity.is_ready() {
        match handle.login().await {
            Ok(view) => info!(stage = ?view.stage, "Auto-login complete"),
            Err(e) => warn!("Auto-login failed: {}", e),
        }
    }

    info!("HeartSync Coordinator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(listener_handle, coordinator_handle, api_handle);
    if let Some(h) = metrics_handle {
        let _ = h.await;
    }

    info!("HeartSync Coordinator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,heartsync_coordinator=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
