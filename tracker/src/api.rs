use crate::bandwidth::BandwidthService;
use crate::error::Result;
use axum::{
    Router,
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

#[derive(Clone)]
struct AppState {
    bandwidth: Arc<BandwidthService>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenericResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

pub fn router(bandwidth: Arc<BandwidthService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/bandwidth", get(get_bandwidth))
        .route("/api/v1/bandwidth/live", get(get_live_bandwidth))
        .route("/api/v1/bandwidth/reset", post(reset_bandwidth))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { bandwidth })
}

/// Serves the API until `shutdown` is cancelled.
pub async fn start_server(
    addr: String,
    bandwidth: Arc<BandwidthService>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, router(bandwidth))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("API server stopped");
    Ok(())
}

fn server_error(message: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorEnvelope { error: message })).into_response()
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[instrument(skip(state))]
async fn get_bandwidth(State(state): State<AppState>) -> impl IntoResponse {
    Json(DataEnvelope {
        data: state.bandwidth.metrics(),
    })
}

#[instrument(skip(state))]
async fn get_live_bandwidth(State(state): State<AppState>) -> Response {
    match state.bandwidth.live_metrics().await {
        Ok(live) => Json(DataEnvelope { data: live }).into_response(),
        Err(e) => {
            error!("Failed to read live bandwidth: {}", e);
            server_error(format!("Failed to read live bandwidth: {}", e))
        }
    }
}

#[instrument(skip(state))]
async fn reset_bandwidth(State(state): State<AppState>) -> Response {
    info!("API: Reset bandwidth request");

    match state.bandwidth.reset().await {
        Ok(()) => Json(DataEnvelope {
            data: GenericResponse {
                success: true,
                message: "Bandwidth accumulator reset".to_string(),
            },
        })
        .into_response(),
        Err(e) => {
            error!("Failed to reset bandwidth accumulator: {}", e);
            server_error(format!("Failed to reset bandwidth accumulator: {}", e))
        }
    }
}
