use axum::{
    Json, Router,
    extract::{
        multipart::{Multipart, MultipartError},
        State,
    },
    http::StatusCode,
    routing::post,
};
use serde::Serialize;
use termsheet_core::{Entities, ExtractionResult, IngestError, ValidationStatus};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(upload))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub document_id: String,
    pub document_name: String,
    pub document_type: String,
    pub extracted_text: String,
    pub ocr_confidence: f64,
    pub extracted_entities: Entities,
    pub validation_status: ValidationStatus,
    pub created_at: String,
}

impl From<ExtractionResult> for UploadResponse {
    fn from(r: ExtractionResult) -> Self {
        Self {
            message: "File uploaded successfully".to_string(),
            document_id: r.id,
            document_name: r.document_name,
            document_type: r.document_type,
            extracted_text: r.extracted_text,
            ocr_confidence: r.ocr_confidence,
            extracted_entities: r.entities,
            validation_status: r.validation_status,
            created_at: r.created_at.to_rfc3339(),
        }
    }
}

struct UploadedFile {
    name: String,
    content_type: Option<String>,
    data: Vec<u8>,
}

/// The `file` field, or failing that the first field that carries a filename.
async fn read_file(multipart: &mut Multipart) -> Result<Option<UploadedFile>, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some("file") && field.file_name().is_none() {
            continue;
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(multipart_error)?;

        return Ok(Some(UploadedFile {
            name,
            content_type,
            data: data.to_vec(),
        }));
    }
    Ok(None)
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let file = read_file(&mut multipart)
        .await?
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "No file uploaded".to_string()))?;

    let saved = state
        .pipeline
        .ingest(&file.data, &file.name, file.content_type.as_deref())
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(UploadResponse::from(saved)))
}

/// Keeps the status the multipart layer chose, such as 413 past the body limit.
fn multipart_error(e: MultipartError) -> (StatusCode, String) {
    (e.status(), e.body_text())
}

fn error_response(e: &IngestError) -> (StatusCode, String) {
    if e.is_bad_input() {
        tracing::info!(error = %e, "Rejected upload");
        (StatusCode::BAD_REQUEST, e.to_string())
    } else {
        tracing::error!(error = %e, "Upload processing failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}
