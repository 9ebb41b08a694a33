use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use torrelay_core::{
    load_config, validate_config, AttemptError, Config, FulfillmentController,
    FulfillmentScheduler, LibrqbitBackend, RelayBackend, RequestStore, SanitizedConfig,
    SqliteRequestStore, StatusAlertCallback, TelegramUploader, TorrentLoader,
};
use torrelay_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("TORRELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );
    info!("Database path: {:?}", config.database.path);

    // Create SQLite request store
    let mut store =
        SqliteRequestStore::new(&config.database.path).context("Failed to create request store")?;
    if let Some(grace) = config.fulfillment.reclaim_after() {
        info!("Reclaiming stale claims after {:?}", grace);
        store = store.with_reclaim_after(grace);
    }
    let store: Arc<dyn RequestStore> = Arc::new(store);
    info!("Request store initialized");

    let shutdown = CancellationToken::new();

    let scheduler = if config.fulfillment.enabled {
        let scheduler = create_scheduler(&config, Arc::clone(&store), &shutdown).await?;
        scheduler.start().await;
        info!("Fulfillment scheduler started");
        Some(scheduler)
    } else {
        info!("Fulfillment disabled in config");
        None
    };

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), store, scheduler.clone()));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Drain the scheduler after the server stops taking requests
    if let Some(ref scheduler) = scheduler {
        info!("Stopping fulfillment scheduler...");
        scheduler.stop().await;
        info!("Fulfillment scheduler stopped");
    }
    shutdown.cancel();

    info!("Server shut down");
    Ok(())
}

/// Wire the torrent session, relay and store into a scheduler.
async fn create_scheduler(
    config: &Config,
    store: Arc<dyn RequestStore>,
    shutdown: &CancellationToken,
) -> Result<Arc<FulfillmentScheduler>> {
    info!(
        "Initializing embedded librqbit session (download path: {})",
        config.loader.download_path
    );
    let backend = LibrqbitBackend::new(&config.loader)
        .await
        .context("Failed to initialize torrent session")?;
    let loader = Arc::new(TorrentLoader::new(
        Arc::new(backend),
        config.fulfillment.metadata_timeout(),
        config.fulfillment.download_timeout(),
    ));

    let Some(relay_config) = &config.relay else {
        bail!("fulfillment enabled but no [relay] config provided");
    };
    let relay = match relay_config.backend {
        RelayBackend::Telegram => {
            let Some(telegram) = &relay_config.telegram else {
                bail!("telegram relay selected but no [relay.telegram] config provided");
            };
            info!("Initializing Telegram relay at {}", telegram.api_url);
            Arc::new(TelegramUploader::new(telegram.clone()).context("Failed to create relay")?)
        }
    };

    let alert: StatusAlertCallback = Arc::new(|err: &AttemptError| {
        error!(
            request_id = err.request_id().unwrap_or("-"),
            error = %err,
            "ALERT: request state could not be recorded, manual intervention needed"
        );
    });

    let controller = FulfillmentController::new(config.fulfillment.clone(), store, loader, relay)
        .with_alert_callback(alert);

    info!(
        distribution_target = %config.fulfillment.distribution_target,
        scan_interval_ms = config.fulfillment.scan_interval_ms,
        max_concurrent_attempts = config.fulfillment.max_concurrent_attempts,
        "Fulfillment controller ready"
    );

    Ok(Arc::new(FulfillmentScheduler::new(Arc::new(controller), shutdown)))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
