//! Server startup.

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use crate::config::Config;
use crate::handlers;
use crate::orchestrator::{CardHandoff, FlowOrchestrator};
use crate::util::{RequestIdLayer, SigDown, Telemetry};

/// Initializes and runs the vault handoff server.
///
/// - Loads `.env` variables.
/// - Installs logging, and OpenTelemetry export when configured.
/// - Loads configuration and wires the orchestrator to the vault and the PSP.
/// - Serves the HTTP endpoints until SIGTERM or SIGINT.
///
/// Binds to `host`/`port` from the configuration, falling back to `HOST`/`PORT`.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize rustls crypto provider (ring)
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("Failed to initialize rustls crypto provider");

    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let addr = SocketAddr::new(config.host(), config.port());

    let orchestrator = FlowOrchestrator::try_from_config(config)?;
    let vault_info = orchestrator.vault_info();
    tracing::info!(
        vault_id = %vault_info.vault_id,
        environment = %vault_info.environment,
        "Card handoff configured"
    );
    let axum_state = Arc::new(orchestrator);

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(telemetry.http_tracing())
        .layer(RequestIdLayer)
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    tracing::info!("Starting server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
