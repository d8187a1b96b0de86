use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use super::ResultStore;
use crate::record::{EmailRecord, ExtractionResult, NewEmailRecord, NewExtraction};
use crate::{Error, Result};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS termsheets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_name TEXT NOT NULL,
    document_type TEXT NOT NULL,
    extracted_text TEXT NOT NULL,
    ocr_confidence REAL NOT NULL,
    entities TEXT NOT NULL,
    validation_status TEXT NOT NULL DEFAULT 'Pending',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_termsheets_created ON termsheets(created_at);

CREATE TABLE IF NOT EXISTS emails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject TEXT,
    sender TEXT,
    body TEXT NOT NULL,
    entities TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
"#;

type TermsheetRow = (i64, String, String, String, f64, String, String, String);

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn open(path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        tracing::info!(path, "SQLite store ready");
        Ok(Self { pool })
    }

    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl ResultStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn save_extraction(&self, record: NewExtraction) -> Result<ExtractionResult> {
        let entities_json = serde_json::to_string(&record.entities)?;

        let (id, created_at): (i64, String) = sqlx::query_as(
            r#"
            INSERT INTO termsheets (document_name, document_type, extracted_text, ocr_confidence, entities, validation_status)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, created_at
            "#,
        )
        .bind(&record.document_name)
        .bind(&record.document_type)
        .bind(&record.extracted_text)
        .bind(record.ocr_confidence)
        .bind(entities_json)
        .bind(record.validation_status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into_stored(id.to_string(), parse_timestamp(&created_at)?))
    }

    async fn save_email(&self, record: NewEmailRecord) -> Result<EmailRecord> {
        let entities_json = serde_json::to_string(&record.entities)?;

        let (id, created_at): (i64, String) = sqlx::query_as(
            r#"
            INSERT INTO emails (subject, sender, body, entities)
            VALUES (?, ?, ?, ?)
            RETURNING id, created_at
            "#,
        )
        .bind(&record.subject)
        .bind(&record.sender)
        .bind(&record.body)
        .bind(entities_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into_stored(id.to_string(), parse_timestamp(&created_at)?))
    }

    async fn get_extraction(&self, id: &str) -> Result<ExtractionResult> {
        let rowid: i64 = id
            .parse()
            .map_err(|_| Error::RecordNotFound(id.to_string()))?;

        let row: TermsheetRow = sqlx::query_as(
            r#"
            SELECT id, document_name, document_type, extracted_text, ocr_confidence, entities, validation_status, created_at
            FROM termsheets WHERE id = ?
            "#,
        )
        .bind(rowid)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;

        parse_termsheet_row(row)
    }

    async fn list_extractions(&self, limit: usize) -> Result<Vec<ExtractionResult>> {
        let rows: Vec<TermsheetRow> = sqlx::query_as(
            r#"
            SELECT id, document_name, document_type, extracted_text, ocr_confidence, entities, validation_status, created_at
            FROM termsheets ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_termsheet_row).collect()
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::InvalidTimestamp(value.to_string()))
}

fn parse_termsheet_row(row: TermsheetRow) -> Result<ExtractionResult> {
    let (
        id,
        document_name,
        document_type,
        extracted_text,
        ocr_confidence,
        entities_json,
        validation_status,
        created_at,
    ) = row;

    Ok(ExtractionResult {
        id: id.to_string(),
        document_name,
        document_type,
        extracted_text,
        ocr_confidence,
        entities: serde_json::from_str(&entities_json)?,
        validation_status: validation_status.parse()?,
        created_at: parse_timestamp(&created_at)?,
    })
}
