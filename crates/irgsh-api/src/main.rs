//! irgsh chief server

use irgsh_api::{AppState, routes};
use irgsh_config::load_system_config;
use irgsh_fleet::Janitor;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/irgsh/config.kdl";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("IRGSH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    info!(path = %config_path, "Loading configuration");
    let config = load_system_config(&config_path)?;

    let state = AppState::connect(&config).await?;
    let shutdown = CancellationToken::new();

    let janitor = state.fleet.clone().map(|registry| {
        let janitor = Janitor::new(registry, config.monitoring.cleanup_interval);
        tokio::spawn(janitor.run(shutdown.clone()))
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(&config.chief.address).await?;
    info!(address = %config.chief.address, "irgsh chief listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(handle) = janitor {
        if let Err(e) = handle.await {
            warn!(error = %e, "Fleet janitor ended abnormally");
        }
    }

    info!("irgsh chief stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
