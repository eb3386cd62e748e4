//! Hub listener bootstrap.
//!
//! Binds first, then reports the real address, so callers (and tests) can
//! use port 0. The router task and the axum server share one cancellation
//! token; shutdown is graceful.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use mcplink_core::ports::{TokenValidator, ToolOverrideRepository};
use mcplink_core::settings::HubSettings;

use crate::router::spawn_router;
use crate::state::{HubContext, HubState};
use crate::{browser, toolserver};

/// Build the hub's axum router with the configured WebSocket paths.
pub fn build_router(state: HubState, settings: &HubSettings) -> Router {
    Router::new()
        .route(&settings.browser_path, get(browser::upgrade))
        .route(&settings.tool_path, get(toolserver::upgrade))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Start the hub: spawn the router task, bind the listener, and serve
/// until cancelled. Returns the bound address and the server task handle.
///
/// # Errors
///
/// Returns an error when the listener cannot bind.
pub async fn start_hub(
    settings: HubSettings,
    overrides: Option<Arc<dyn ToolOverrideRepository>>,
    validator: Arc<dyn TokenValidator>,
    cancel: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let router = spawn_router(overrides, cancel.clone());
    let state: HubState = Arc::new(HubContext { router, validator });
    let app = build_router(state, &settings);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    let bound = listener.local_addr()?;
    info!(
        addr = %bound,
        browser_path = %settings.browser_path,
        tool_path = %settings.tool_path,
        "hub listening"
    );

    let server_cancel = cancel.clone();
    let join = tokio::spawn(async move {
        let shutdown = async move { server_cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound, join))
}
