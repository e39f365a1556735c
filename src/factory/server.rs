use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::ai::{CodeGenerator, OpenAiGenerator};
use super::api::{self, AppState, GitHubStatus, SharedState};
use super::github::GitHubHost;
use super::orchestrator::BuildOrchestrator;
use super::session::BuildSession;
use super::ws;
use crate::config::ForgeConfig;

/// Configuration for the plugin-forge server.
pub struct ServerConfig {
    pub port: u16,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            dev_mode: false,
        }
    }
}

/// Wire the session, the GitHub host, the AI client and the build driver
/// together from configuration.
pub fn build_state(config: &ForgeConfig) -> SharedState {
    let (ws_tx, _rx) = broadcast::channel::<String>(256);
    let session = Arc::new(BuildSession::new(config.toml.build_settings(), ws_tx));
    let host = GitHubHost::from_config(config);
    let github = GitHubStatus::from_host(&host);
    let generator: Arc<dyn CodeGenerator> = Arc::new(OpenAiGenerator::from_config(config));
    let orchestrator = Arc::new(BuildOrchestrator::new(
        Arc::clone(&session),
        Arc::new(host),
        Arc::clone(&generator),
        &config.toml.build,
    ));
    Arc::new(AppState {
        session,
        orchestrator,
        generator,
        github,
    })
}

/// Build the full application router with API and WebSocket.
pub fn build_router(state: SharedState) -> Router {
    let ws_tx = state.session.sender().clone();

    api::api_router()
        .route(
            "/ws",
            get(move |ws_upgrade| ws::ws_handler_with_sender(ws_upgrade, ws_tx)),
        )
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not found"})),
    )
}

/// Start the server and block until Ctrl+C.
pub async fn start_server(config: ServerConfig, forge: &ForgeConfig) -> Result<()> {
    let state = build_state(forge);
    let orchestrator = Arc::clone(&state.orchestrator);

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, "server listening");
    println!("plugin-forge running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown();
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
