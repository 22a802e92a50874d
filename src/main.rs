use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use terrarium_service::{
    api::{self, AppState, ServiceSettings},
    clock::SystemClock,
    config::Config,
    db::{self, PgStore},
    govee::{EnvironmentSensor, GoveeClient},
    shelly::ShellyClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent, env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    let sensor: Option<Arc<dyn EnvironmentSensor>> = match &config.govee {
        Some(govee) => Some(Arc::new(GoveeClient::new(govee))),
        None => {
            warn!("GOVEE_API_KEY / GOVEE_MAC_ADDRESS not set; reading collection disabled");
            None
        }
    };

    // One status cache per process, shared by every handler through the state.
    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(ShellyClient::new(&config.shelly)),
        sensor,
        Arc::new(SystemClock),
        ServiceSettings::from(&config),
    );

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, timezone = %config.timezone, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received");
}
