//! Persistence back-ends for extraction results and processed emails.

mod firestore;
mod sqlite;

pub use firestore::{FirestoreStore, ServiceAccount};
pub use sqlite::SqliteStore;

use crate::record::{EmailRecord, ExtractionResult, NewEmailRecord, NewExtraction};
use crate::Result;

/// Where finished extractions go. Stores assign `id` and `created_at`.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Short back-end name for logs and health checks.
    fn backend(&self) -> &'static str;

    async fn save_extraction(&self, record: NewExtraction) -> Result<ExtractionResult>;

    async fn save_email(&self, record: NewEmailRecord) -> Result<EmailRecord>;

    async fn get_extraction(&self, id: &str) -> Result<ExtractionResult>;

    /// Most recent first.
    async fn list_extractions(&self, limit: usize) -> Result<Vec<ExtractionResult>>;
}
