//! Ref history endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use runway_core::{Build, BuildType};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{build_type}", get(list_refs))
        .route("/{build_type}/builds", get(ref_builds))
}

#[derive(Debug, Deserialize)]
pub struct RefBuildsQuery {
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default)]
    pub start: i64,
    #[serde(default = "unbounded")]
    pub end: i64,
}

fn unbounded() -> i64 {
    -1
}

fn parse_build_type(raw: &str) -> Result<BuildType, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}

async fn list_refs(
    State(state): State<AppState>,
    Path(build_type): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let build_type = parse_build_type(&build_type)?;
    let refs = state.db.call(move |db| db.refs(build_type)).await?;
    Ok(Json(refs))
}

/// Builds of one ref, newest first.
async fn ref_builds(
    State(state): State<AppState>,
    Path(build_type): Path<String>,
    Query(query): Query<RefBuildsQuery>,
) -> Result<Json<Vec<Build>>, ApiError> {
    let build_type = parse_build_type(&build_type)?;
    let builds = state
        .db
        .call(move |db| db.ref_builds(build_type, &query.ref_name, query.start, query.end))
        .await?;
    Ok(Json(builds))
}
