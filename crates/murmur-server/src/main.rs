use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_server::api::{self, AppState};
use murmur_server::auth::IdentityGate;
use murmur_server::config::ServerConfig;
use murmur_shared::constants;
use murmur_store::Database;

/// How often lapsed presence markers are dropped.
const PRESENCE_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug")),
        )
        .init();

    info!(
        "Starting {} chat relay v{}",
        constants::APP_NAME,
        env!("CARGO_PKG_VERSION")
    );

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems (any failure here is fatal)
    // -----------------------------------------------------------------------
    let identity = IdentityGate::from_config(&config).context("loading token keys")?;

    let db_path = config.database_path.clone();
    let db = tokio::task::spawn_blocking(move || Database::open_at(&db_path))
        .await
        .context("database open task")?
        .context("opening database")?;

    let http_addr = config.http_addr;
    let state = AppState::new(config, db, identity)
        .await
        .context("initializing attachment storage")?;

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let presence = state.presence.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRESENCE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            presence.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP / WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
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
