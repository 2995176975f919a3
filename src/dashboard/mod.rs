//! Status server: a small read-only JSON API over the running agent.
//!
//! CORS enabled for local tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{AppState, StatusState};

/// Bind the status port and serve in a background task.
///
/// Binding happens before this returns so a taken port surfaces as an
/// error at startup. The server stops when `shutdown` flips to `true`.
pub async fn spawn_status_server(
    state: AppState,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status port {port}"))?;

    info!(port, "Status server listening on http://localhost:{port}");

    tokio::spawn(async move {
        let graceful = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
        {
            error!(error = %e, "Status server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/positions/:epoch", get(routes::get_position))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
