use crate::AppState;
use crate::models::UsageSnapshot;
use axum::{Json, extract::State};

#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Current usage counters and uptime", body = UsageSnapshot)
    ),
    tag = "system"
)]
pub async fn get_stats(State(state): State<AppState>) -> Json<UsageSnapshot> {
    Json(state.counters.snapshot())
}
