use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub renderer: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service banner", body = StatusResponse)
    ),
    tag = "system"
)]
pub async fn home() -> impl IntoResponse {
    Json(StatusResponse {
        status: "Conversion backend running".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_status = if tokio::fs::try_exists(state.store.root())
        .await
        .unwrap_or(false)
    {
        "ready"
    } else {
        "missing"
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        storage: storage_status.to_string(),
        renderer: state.pipeline.renderer_name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
