//! API routes.

pub mod builds;
pub mod commits;
pub mod health;
pub mod refs;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .nest("/webhooks", webhooks::router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .merge(builds::router())
        .nest("/refs", refs::router())
        .nest("/commits", commits::router())
}
