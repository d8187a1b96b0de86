use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use termsheet_core::Error;

use super::upload::UploadResponse;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_termsheets))
        .route("/{id}", get(get_termsheet))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    limit: Option<usize>,
}

async fn list_termsheets(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<UploadResponse>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let records = state
        .pipeline
        .store()
        .list_extractions(limit)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(records.into_iter().map(UploadResponse::from).collect()))
}

async fn get_termsheet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let record = state
        .pipeline
        .store()
        .get_extraction(&id)
        .await
        .map_err(|e| match e {
            Error::RecordNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;

    Ok(Json(UploadResponse::from(record)))
}
