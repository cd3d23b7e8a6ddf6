//! HTTP server setup and configuration.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::upstream::UpstreamClient;
use crate::auth::{CredentialChain, Gatekeeper};
use crate::config::Config;

/// Largest request body accepted from clients.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state.
///
/// Built once at startup; nothing in it changes while requests are served.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub gatekeeper: Arc<Gatekeeper>,
    pub credentials: Arc<CredentialChain>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build state around an existing HTTP client.
    pub fn with_client(config: Config, http_client: Client) -> Self {
        Self {
            upstream: UpstreamClient::new(http_client, &config.upstream)
                .with_body_logging(config.logging.log_bodies),
            gatekeeper: Arc::new(Gatekeeper::from_config(&config.auth)),
            credentials: Arc::new(CredentialChain::default()),
            config: Arc::new(config),
        }
    }

    /// Build state with an HTTP client configured from `config`.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
            .build()?;
        Ok(Self::with_client(config, http_client))
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/health",
            get(handlers::health).fallback(handlers::relay),
        )
        // OpenAI-compatible endpoint
        .route(
            "/openai/v1/chat/completions",
            post(handlers::chat_completions).fallback(handlers::relay),
        )
        // Everything else is classified by path
        .fallback(handlers::relay)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(handlers::cors))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let stream_mode = config.upstream.stream_mode;
    let base_url = config.upstream.base_url.clone();

    let state = AppState::new(config)?;
    tracing::info!(
        gated = state.gatekeeper.is_gated(),
        pool_size = state.gatekeeper.pool().len(),
        strategy = %state.gatekeeper.pool().strategy(),
        "Credential handling configured"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(
        address = %listen_addr,
        upstream = %base_url,
        stream_mode = %stream_mode,
        "Starting gemini-relay"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
