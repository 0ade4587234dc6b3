use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use pulse_core::{scoring, StreamError, StreamRecord, StreamStatus};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: StreamStatus,
    pub health_score: f64,
    pub media_sequence: i64,
    pub segment_count: usize,
    pub error_count: u64,
    pub last_checked: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorsResponse {
    pub stream_id: String,
    pub status: StreamStatus,
    pub errors: Vec<StreamError>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/streams", get(list_streams))
        .route("/streams/{id}", get(get_stream))
        .route("/streams/{id}/errors", get(get_stream_errors))
}

fn summarize(record: &StreamRecord, state: &AppState) -> StreamSummary {
    let now = Utc::now();
    let recent = scoring::recent_issues(record, now, state.config.recent_window);
    let decay = scoring::decay_factor(record.health.last_error_time, now);

    StreamSummary {
        id: record.id.clone(),
        name: record.name.clone(),
        url: record.url.clone(),
        status: record.status,
        health_score: scoring::health_score(record, Some(&recent), decay).round(),
        media_sequence: record.health.media_sequence,
        segment_count: record.health.segment_count,
        error_count: record.health.total_errors,
        last_checked: record.last_checked.map(|t| t.to_rfc3339()),
    }
}

async fn find_stream(state: &AppState, id: &str) -> Result<StreamRecord, ApiError> {
    state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Stream {} not found", id)))
}

/// GET /api/v1/streams
async fn list_streams(State(state): State<AppState>) -> Result<Json<Vec<StreamSummary>>, ApiError> {
    let records = state.store.find_all().await?;
    Ok(Json(records.iter().map(|r| summarize(r, &state)).collect()))
}

/// GET /api/v1/streams/:id
async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StreamRecord>, ApiError> {
    Ok(Json(find_stream(&state, &id).await?))
}

/// GET /api/v1/streams/:id/errors
async fn get_stream_errors(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ErrorsResponse>, ApiError> {
    let record = find_stream(&state, &id).await?;

    let mut errors = record.stream_errors;
    errors.sort_by(|a, b| b.date.cmp(&a.date));

    Ok(Json(ErrorsResponse {
        stream_id: record.id,
        status: record.status,
        errors,
    }))
}
