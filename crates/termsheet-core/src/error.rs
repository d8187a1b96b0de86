use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid validation status: {0}")]
    InvalidValidationStatus(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Document store error: {0}")]
    DocumentStore(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
