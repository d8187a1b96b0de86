use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::extractor::{EntityError, EntityExtractor};
use super::text::{TextError, TextExtractor};
use crate::mail::{parse_message, MailError, MailSource};
use crate::record::{EmailRecord, ExtractionResult, NewEmailRecord, NewExtraction};
use crate::store::ResultStore;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Text(#[from] TextError),
    #[error("Entity extraction failed: {0}")]
    Entity(#[from] EntityError),
    #[error("Mail error: {0}")]
    Mail(#[from] MailError),
    #[error("Storage failed: {0}")]
    Store(#[from] crate::Error),
}

impl IngestError {
    /// True when the document itself is at fault rather than a service.
    #[must_use]
    pub const fn is_bad_input(&self) -> bool {
        matches!(
            self,
            Self::Text(TextError::UnsupportedFileType(_) | TextError::EmptyExtraction(_))
        )
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Text extraction, then entity extraction, then persistence.
pub struct IngestPipeline {
    text: TextExtractor,
    entities: EntityExtractor,
    store: Arc<dyn ResultStore>,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(text: TextExtractor, entities: EntityExtractor, store: Arc<dyn ResultStore>) -> Self {
        Self {
            text,
            entities,
            store,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    #[must_use]
    pub fn entity_extractor(&self) -> &EntityExtractor {
        &self.entities
    }

    /// Extract, tag, and persist one uploaded document. `content_type` is the
    /// client's declared type; without one the sniffed type is recorded.
    pub async fn ingest(
        &self,
        data: &[u8],
        filename: &str,
        content_type: Option<&str>,
    ) -> IngestResult<ExtractionResult> {
        let start = Instant::now();

        let extracted = self.text.extract(data, filename).await?;
        let (format, pages, confidence) =
            (extracted.format, extracted.page_count, extracted.confidence);

        tracing::debug!(
            document = filename,
            format = %format,
            pages,
            chars = extracted.text.len(),
            "Text extracted"
        );

        let entities = self.entities.extract(&extracted.text).await?;

        let document_type = content_type
            .filter(|t| !t.trim().is_empty())
            .map_or_else(|| format.mime().to_string(), str::to_string);

        let draft = NewExtraction::new(filename.to_string(), document_type)
            .with_text(extracted.text, confidence)
            .with_entities(entities);

        let saved = self.store.save_extraction(draft).await?;

        tracing::info!(
            id = %saved.id,
            document = filename,
            format = %format,
            pages,
            entities = saved.entities.len(),
            confidence,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Ingested document"
        );

        Ok(saved)
    }

    /// Tag and persist one raw RFC 822 message.
    pub async fn ingest_email(&self, raw: &[u8]) -> IngestResult<EmailRecord> {
        let email = parse_message(raw)?;
        let entities = self.entities.extract(&email.body).await?;

        let saved = self
            .store
            .save_email(NewEmailRecord {
                subject: email.subject,
                sender: email.sender,
                body: email.body,
                entities,
            })
            .await?;

        tracing::info!(
            id = %saved.id,
            subject = saved.subject.as_deref().unwrap_or(""),
            entities = saved.entities.len(),
            "Ingested email"
        );

        Ok(saved)
    }

    /// Fetch the newest `limit` messages matching `subject` and ingest each
    /// in mailbox order. Stops at the first failure.
    pub async fn ingest_mailbox(
        &self,
        source: &dyn MailSource,
        subject: &str,
        limit: usize,
    ) -> IngestResult<Vec<EmailRecord>> {
        let start = Instant::now();
        let messages = source.fetch_matching(subject, limit).await?;

        let mut records = Vec::with_capacity(messages.len());
        for raw in &messages {
            records.push(self.ingest_email(raw).await?);
        }

        tracing::info!(
            subject,
            fetched = messages.len(),
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Mailbox ingested"
        );

        Ok(records)
    }
}
