use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use termsheet_core::{EmailRecord, Entities};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/fetch", get(fetch_emails))
}

#[derive(Debug, Serialize)]
pub struct EmailResponse {
    pub id: String,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub body: String,
    pub extracted_entities: Entities,
}

impl From<EmailRecord> for EmailResponse {
    fn from(e: EmailRecord) -> Self {
        Self {
            id: e.id,
            subject: e.subject,
            from: e.sender,
            body: e.body,
            extracted_entities: e.entities,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub emails: Vec<EmailResponse>,
}

async fn fetch_emails(
    State(state): State<AppState>,
) -> Result<Json<FetchResponse>, (StatusCode, String)> {
    let records = state
        .pipeline
        .ingest_mailbox(&*state.mailbox, &state.subject_filter, state.fetch_limit)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Mailbox fetch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(FetchResponse {
        emails: records.into_iter().map(EmailResponse::from).collect(),
    }))
}
