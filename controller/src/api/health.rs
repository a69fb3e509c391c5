use axum::Json;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use time::OffsetDateTime;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
    total_sessions: usize,
    inactive_sessions: usize,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    service: &'static str,
}

pub fn make_router<S>(state: AppState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/api/sessions/health", get(get_health))
        .with_state(state)
}

async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.sessions.counts().await;
    Json(HealthResponse {
        status: "ok",
        active_sessions: counts.active,
        total_sessions: counts.total,
        inactive_sessions: counts.inactive,
        timestamp: OffsetDateTime::now_utc(),
        service: "ha-rec-controller",
    })
}
