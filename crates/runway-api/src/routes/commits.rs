//! Commit history endpoint.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use runway_core::Build;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/{sha}/builds", get(sha_builds))
}

/// Every build of a commit, oldest first.
async fn sha_builds(
    State(state): State<AppState>,
    Path(sha): Path<String>,
) -> Result<Json<Vec<Build>>, ApiError> {
    let builds = state.db.call(move |db| db.sha_builds(&sha)).await?;
    Ok(Json(builds))
}
