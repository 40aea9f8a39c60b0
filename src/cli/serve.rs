//! HTTP surface of `trailer-resolver serve`.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{Resolver, ResolverStats};
use crate::domain::{MediaIdentifier, MediaType, ResolveError, ResolvedStream};

/// Error body: `{ "outcome": <kind>, "message": <text> }`
#[derive(Debug, Serialize)]
struct ErrorBody {
    outcome: String,
    message: String,
}

/// Failure of an HTTP request
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Resolve(ResolveError),
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        Self::Resolve(err)
    }
}

/// HTTP status for each resolution outcome
pub fn status_for(err: &ResolveError) -> StatusCode {
    match err {
        ResolveError::NotFound | ResolveError::ExtractionExhausted { .. } => StatusCode::NOT_FOUND,
        ResolveError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        ResolveError::Timeout { .. } | ResolveError::TotalTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        ResolveError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    outcome: "bad_request".to_string(),
                    message,
                },
            ),
            Self::Resolve(err) => (
                status_for(&err),
                ErrorBody {
                    outcome: err.kind().to_string(),
                    message: err.to_string(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(resolver: Resolver) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/resolve/{media_type}/{id}", get(resolve))
        .with_state(resolver)
}

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(resolver): State<Resolver>) -> Json<ResolverStats> {
    Json(resolver.stats())
}

async fn resolve(
    State(resolver): State<Resolver>,
    Path((media_type, id)): Path<(String, String)>,
) -> Result<Json<ResolvedStream>, ApiError> {
    let id = parse_request(&media_type, &id)?;
    let stream = resolver.resolve(&id).await?;
    Ok(Json(stream))
}

/// Accepts add-on style ids, with or without a `.json` suffix
fn parse_request(media_type: &str, raw_id: &str) -> Result<MediaIdentifier, ApiError> {
    let media_type = media_type
        .parse::<MediaType>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let raw_id = raw_id.strip_suffix(".json").unwrap_or(raw_id);
    MediaIdentifier::parse(media_type, raw_id).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Serve until Ctrl-C, then stop admitting and drain
pub async fn run(resolver: Resolver, addr: SocketAddr) -> Result<()> {
    let maintenance = resolver.spawn_maintenance();
    let app = router(resolver.clone());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    resolver.shutdown();
    maintenance.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
