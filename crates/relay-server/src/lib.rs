//! Copilot Relay server
//!
//! HTTP surface for the protocol-translation gateway: an OpenAI-style
//! `/v1/chat/completions` endpoint and an Anthropic-style `/v1/messages`
//! endpoint, both forwarded to the Copilot backend. This is a library
//! crate - the binary starts it via [`start_server`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::Method, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use relay_core::forward::Forwarder;
use relay_core::storage::CredentialStore;
use relay_core::token::TokenManager;
use relay_core::upstream::CopilotClient;

pub mod error;
pub mod routes;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<Forwarder>,
}

impl AppState {
    /// Wire the production component stack: real backend, credentials
    /// from the user's home directory.
    pub fn from_environment() -> Self {
        let client = Arc::new(CopilotClient::new());
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&client),
            CredentialStore::new(),
        ));
        Self {
            forwarder: Arc::new(Forwarder::new(client, tokens)),
        }
    }
}

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/v1", routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the relay and block until shutdown.
pub async fn start_server(host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::from_environment();
    let app = build_router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!("Copilot Relay listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: env!("CARGO_PKG_DESCRIPTION"),
    })
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    description: &'static str,
}
