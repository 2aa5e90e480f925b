//! HTTP surface over the event store: health, REST loan reads, and a
//! GraphQL-compatible POST endpoint shaped like the hosted subgraph.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use domalend_core::{EventStore, IndexerHandle};

mod graphql;
mod rest;

pub use graphql::execute_query;

/// Total budget for one request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub indexer: IndexerHandle,
}

/// Build the router with CORS and timeout layers applied.
pub fn router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    let router = Router::new()
        .route("/health", get(rest::health))
        .route("/api/stats", get(rest::stats))
        .route("/api/loans/all", get(rest::loans_all))
        .route("/api/loans/:kind", get(rest::loans_by_kind))
        .route("/graphql", post(graphql::graphql))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors_layer(cors_origin)?)
        .with_state(state);

    Ok(router)
}

/// Bind the listener. Failing to acquire the port is a startup error, kept
/// separate from serving so the supervisor can refuse to start.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Serve until the shutdown token fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP surface listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server failed")
}

fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origin == "*" {
        return Ok(layer.allow_origin(Any));
    }

    // Comma-separated allow-list
    let origins = origin
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(|o| {
            o.parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin {o:?}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(origins))
}

/// Error body with the stable code vocabulary.
pub(crate) fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> Response {
    let body = serde_json::json!({
        "errors": [{
            "message": message.into(),
            "extensions": { "code": code }
        }]
    });
    (status, Json(body)).into_response()
}
