pub mod health;
pub mod sessions;

use axum::Router;

use crate::AppState;

pub fn make_router<S>(state: AppState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .nest("/api/sessions", sessions::make_router(state.clone()))
        .merge(health::make_router(state))
}
