pub mod error;
pub mod ingest;
pub mod mail;
pub mod record;
pub mod store;

pub use error::{Error, Result};
pub use ingest::{
    DocumentFormat, EntityExtractor, EntityRecognizer, IngestError, IngestPipeline,
    IngestResult, NoopRecognizer, OcrEngine, PatternRecognizer, PdfRasterizer, Pdftoppm,
    TesseractOcr, TextExtractor,
};
pub use mail::{parse_message, ImapMailbox, MailError, MailSource, ParsedEmail};
pub use record::{
    EmailRecord, Entities, ExtractionResult, NewEmailRecord, NewExtraction, ValidationStatus,
};
pub use store::{FirestoreStore, ResultStore, ServiceAccount, SqliteStore};
