use axum::{Json, Router, routing::get};
use chrono::{DateTime, Utc};
use referral_ledger::paths;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const SERVICE_NAME: &str = "affiliate";

/// Liveness of the affiliate service process
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    /// crate version of the running binary
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    fn healthy(now: DateTime<Utc>) -> Self {
        HealthResponse {
            status: "healthy".to_string(),
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: now,
        }
    }
}

#[utoipa::path(
    get,
    path = paths::HEALTH,
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy(Utc::now()))
}

/// Mounted under [paths::HEALTH], outside the trace layer
pub fn router() -> Router {
    Router::new().route("/", get(health))
}
