use crate::AppState;
use crate::services::storage::{BucketPresence, OperationScope};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::time::Duration;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// "present", "absent" or "unreachable"
    pub storage: String,
    pub bucket: Option<String>,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and bucket are available", body = HealthResponse),
        (status = 503, description = "Bucket missing or store unreachable", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let scope = OperationScope::with_timeout(Duration::from_secs(5));
    let _guard = scope.cancel_on_drop();

    let session = state.gateway.session().with_scope(&scope);
    let (code, storage) = match session.bucket_exists().await {
        BucketPresence::Present => (StatusCode::OK, "present"),
        BucketPresence::Absent => (StatusCode::SERVICE_UNAVAILABLE, "absent"),
        BucketPresence::Indeterminate(e) => {
            tracing::warn!("Health check could not reach storage: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unreachable")
        }
    };

    let status = if code.is_success() { "ok" } else { "degraded" };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            storage: storage.to_string(),
            bucket: session.bucket_name().map(str::to_string),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
