//! Read-only status endpoints.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/status` | Both loop statuses as JSON |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | 200, or 503 while either loop is degraded |

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use qscale_autoscale::StatusHandle;
use qscale_core::{PoolStatus, ScalingStatus};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub scaling: ScalingStatus,
    pub pool: PoolStatus,
    pub degraded: bool,
}

pub fn build_router(status: StatusHandle) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .with_state(status)
}

async fn get_status(State(status): State<StatusHandle>) -> Json<StatusResponse> {
    Json(StatusResponse {
        scaling: status.scaling(),
        pool: status.pool(),
        degraded: status.degraded(),
    })
}

async fn prometheus_metrics(State(status): State<StatusHandle>) -> impl IntoResponse {
    let body = qscale_metrics::render_prometheus(&status.scaling(), &status.pool());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn healthz(State(status): State<StatusHandle>) -> impl IntoResponse {
    if status.degraded() {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    }
}
