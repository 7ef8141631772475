//! HTTP routes.

pub mod channels;
pub mod health;
pub mod stream;

use axum::Router;

use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/stream", stream::router())
        .nest("/api/channels", channels::router())
        .nest("/health", health::router())
        .with_state(state)
}
