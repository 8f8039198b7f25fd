//! Build and build output endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use runway_core::{Build, BuildId, BuildStatus, Channel, OutputLine};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/builds", get(list_builds))
        .route("/builds/{id}", get(get_build))
        .route("/builds/{id}/output", get(get_output))
        .route("/pending", get(pending_builds))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Line window of an output poll; `end = -1` reads to the latest line.
#[derive(Debug, Deserialize)]
pub struct OutputQuery {
    #[serde(default)]
    pub start: i64,
    #[serde(default = "unbounded")]
    pub end: i64,
}

fn unbounded() -> i64 {
    -1
}

/// Response body of an output poll.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputResponse {
    pub outputs: Vec<OutputEntry>,
    pub status: BuildStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputEntry {
    pub content: String,
    pub channel: Channel,
}

impl From<OutputLine> for OutputEntry {
    fn from(line: OutputLine) -> Self {
        Self {
            content: line.content,
            channel: line.channel,
        }
    }
}

async fn list_builds(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Build>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let builds = state.db.call(move |db| db.recent_builds(limit)).await?;
    Ok(Json(builds))
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<Build>, ApiError> {
    let build = state.db.call(move |db| db.build(id)).await?;
    Ok(Json(build))
}

async fn get_output(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    Query(query): Query<OutputQuery>,
) -> Result<Json<OutputResponse>, ApiError> {
    let (build, lines) = state
        .db
        .call(move |db| db.build_output(id, query.start, query.end))
        .await?;
    Ok(Json(OutputResponse {
        outputs: lines.into_iter().map(OutputEntry::from).collect(),
        status: build.status,
    }))
}

async fn pending_builds(State(state): State<AppState>) -> Result<Json<Vec<Build>>, ApiError> {
    let builds = state.db.call(|db| db.pending_builds()).await?;
    Ok(Json(builds))
}
