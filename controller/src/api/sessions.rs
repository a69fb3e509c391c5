use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AppState;
use crate::extract::ClientHost;
use crate::http::HttpError;
use crate::session::{RegisterRequest, Session};

pub fn make_router<S>(state: AppState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", post(register_session).get(list_active))
        .route("/all", get(list_all))
        .route("/inactive", get(list_inactive))
        .route("/cleanup", post(cleanup))
        .route("/{id}", get(get_session).delete(deregister_session))
        .route("/{id}/active", get(is_active))
        .route("/{id}/heartbeat", put(heartbeat))
        .route("/{id}/status", put(update_status))
        .route("/{id}/recording-path", put(update_recording_path))
        .route("/{id}/stop", put(stop))
        .route("/{id}/deactivate", put(deactivate))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    session_id: String,
    client_id: String,
    client_host: Option<String>,
    unique_session_id: Option<String>,
    original_session_id: Option<String>,
    status: Option<String>,
    metadata: Option<serde_json::Value>,
    environment: Option<serde_json::Value>,
    #[serde(default)]
    #[allow(dead_code)] // accepted for wire compatibility, not interpreted by the core
    recording_json: Option<serde_json::Value>,
}

async fn register_session(
    State(state): State<AppState>,
    client_host: ClientHost,
    Json(body): Json<RegisterBody>,
) -> Result<(axum::http::StatusCode, Json<Session>), HttpError> {
    let session = state
        .sessions
        .register(RegisterRequest {
            session_id: body.session_id,
            client_id: body.client_id,
            client_host: body.client_host.or(Some(client_host.0)),
            unique_session_id: body.unique_session_id,
            original_session_id: body.original_session_id,
            status: body.status,
            metadata: body.metadata,
            environment: body.environment,
        })
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(session)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    sessions: Vec<Session>,
    count: usize,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    #[serde(rename = "type")]
    kind: &'static str,
}

async fn list_active(State(state): State<AppState>) -> Json<ListResponse> {
    let sessions = state.sessions.list_active().await;
    Json(ListResponse {
        count: sessions.len(),
        sessions,
        timestamp: OffsetDateTime::now_utc(),
        kind: "active",
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListAllResponse {
    sessions: Vec<Session>,
    total_count: usize,
    active_count: usize,
    inactive_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    #[serde(rename = "type")]
    kind: &'static str,
}

async fn list_all(State(state): State<AppState>) -> Json<ListAllResponse> {
    let sessions = state.sessions.list_all().await;
    let active_count = sessions.iter().filter(|s| s.active).count();
    let total_count = sessions.len();
    Json(ListAllResponse {
        sessions,
        total_count,
        active_count,
        inactive_count: total_count - active_count,
        timestamp: OffsetDateTime::now_utc(),
        kind: "all",
    })
}

async fn list_inactive(State(state): State<AppState>) -> Json<ListResponse> {
    let sessions = state.sessions.list_inactive().await;
    Json(ListResponse {
        count: sessions.len(),
        sessions,
        timestamp: OffsetDateTime::now_utc(),
        kind: "inactive",
    })
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Session>, HttpError> {
    Ok(Json(state.sessions.get(id).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveResponse {
    session_id: String,
    active: bool,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

async fn is_active(State(state): State<AppState>, Path(id): Path<String>) -> Json<ActiveResponse> {
    let active = state.sessions.is_active(id.clone()).await;
    Json(ActiveResponse {
        session_id: id,
        active,
        timestamp: OffsetDateTime::now_utc(),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody {
    last_chunk: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatResponse {
    message: &'static str,
    session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_chunk: Option<String>,
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<HeartbeatBody>>,
) -> Result<Json<HeartbeatResponse>, HttpError> {
    let last_chunk = body.and_then(|Json(b)| b.last_chunk);
    let session = state.sessions.heartbeat(id.clone(), last_chunk).await?;
    Ok(Json(HeartbeatResponse {
        message: "heartbeat recorded",
        session_id: id,
        timestamp: OffsetDateTime::now_utc(),
        last_chunk: session.last_chunk,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    message: &'static str,
    session_id: String,
    status: String,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Json<StatusResponse>, HttpError> {
    let session = state.sessions.update_status(id.clone(), body.status).await?;
    Ok(Json(StatusResponse {
        message: "status updated",
        session_id: id,
        status: session.status.to_string(),
        timestamp: OffsetDateTime::now_utc(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingPathBody {
    recording_path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordingPathResponse {
    message: &'static str,
    session_id: String,
    recording_path: String,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

async fn update_recording_path(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RecordingPathBody>,
) -> Result<Json<RecordingPathResponse>, HttpError> {
    let session = state
        .sessions
        .update_recording_path(id.clone(), body.recording_path)
        .await?;
    Ok(Json(RecordingPathResponse {
        message: "recording path updated",
        session_id: id,
        recording_path: session.recording_path.unwrap_or_default(),
        timestamp: OffsetDateTime::now_utc(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleResponse {
    message: &'static str,
    session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SimpleResponse>, HttpError> {
    state.sessions.stop(id.clone()).await?;
    Ok(Json(SimpleResponse {
        message: "session stopping",
        session_id: id,
        timestamp: OffsetDateTime::now_utc(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeactivateResponse {
    message: &'static str,
    session_id: String,
    status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

async fn deactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeactivateResponse>, HttpError> {
    state.sessions.deactivate(id.clone()).await?;
    Ok(Json(DeactivateResponse {
        message: "session deactivated",
        session_id: id,
        status: "INACTIVE",
        timestamp: OffsetDateTime::now_utc(),
    }))
}

async fn deregister_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SimpleResponse>, HttpError> {
    state.sessions.deregister(id.clone()).await?;
    Ok(Json(SimpleResponse {
        message: "session deregistered",
        session_id: id,
        timestamp: OffsetDateTime::now_utc(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResponse {
    message: &'static str,
    removed_sessions: usize,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

async fn cleanup(State(state): State<AppState>) -> Json<CleanupResponse> {
    let orphans = state.sessions.cleanup_orphaned().await;
    let expired = state.sessions.cleanup_expired(state.conf.reaper.max_age_hours).await;
    Json(CleanupResponse {
        message: "cleanup completed",
        removed_sessions: orphans + expired,
        timestamp: OffsetDateTime::now_utc(),
    })
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt as _;

    use super::*;
    use crate::session::spawn_session_manager;
    use crate::store::MemorySessionRepository;
    use crate::config::Conf;

    fn test_state() -> AppState {
        let (sessions, _child, _reaper) = spawn_session_manager(Box::new(MemorySessionRepository::new()), 24);
        AppState {
            conf: std::sync::Arc::new(Conf::mock()),
            sessions,
        }
    }

    #[tokio::test]
    async fn register_then_get_roundtrip() {
        let state = test_state();
        let router = crate::api::make_router::<()>(state);

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/sessions")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                serde_json::json!({"sessionId": "s1", "clientId": "c1"}).to_string(),
            ))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::CREATED);

        let req = axum::http::Request::builder()
            .method("GET")
            .uri("/api/sessions/s1")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn get_missing_session_is_404() {
        let state = test_state();
        let router = crate::api::make_router::<()>(state);
        let req = axum::http::Request::builder()
            .method("GET")
            .uri("/api/sessions/nope")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
