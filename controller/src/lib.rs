#[macro_use]
extern crate tracing;

pub mod api;
pub mod auth;
pub mod config;
pub mod extract;
pub mod http;
pub mod reaper;
pub mod session;
pub mod store;

use std::sync::Arc;

use axum::Router;

use config::Conf;
use session::SessionHandle;

/// Shared application state threaded through every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub conf: Arc<Conf>,
    pub sessions: SessionHandle,
}

pub fn make_router(state: AppState) -> Router {
    api::make_router(state.clone())
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::basic_auth_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
