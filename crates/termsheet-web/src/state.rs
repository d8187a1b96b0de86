use std::sync::Arc;

use anyhow::Context;
use termsheet_core::ingest::{ClauseSet, EntityRecognizer};
use termsheet_core::{
    EntityExtractor, FirestoreStore, ImapMailbox, IngestPipeline, MailSource, PatternRecognizer,
    Pdftoppm, ResultStore, ServiceAccount, SqliteStore, TesseractOcr, TextExtractor,
};

use crate::config::{ServerConfig, StoreBackend};

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub mailbox: Arc<dyn MailSource>,
    pub subject_filter: Arc<str>,
    pub fetch_limit: usize,
}

impl AppState {
    pub fn new(
        pipeline: IngestPipeline,
        mailbox: Arc<dyn MailSource>,
        subject_filter: &str,
        fetch_limit: usize,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            mailbox,
            subject_filter: Arc::from(subject_filter),
            fetch_limit,
        }
    }

    /// One-time start-up: open the store, find the OCR and PDF tools, load
    /// the recognizer, and set up the mailbox client.
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let store = open_store(config).await?;

        let text = TextExtractor::new(Arc::new(ocr_engine(config)), Arc::new(rasterizer(config)));

        let entities = EntityExtractor::new(recognizer(config)?, ClauseSet::term_sheet()?);
        tracing::info!(recognizer = entities.recognizer_name(), "Entity extractor ready");

        let mailbox = ImapMailbox::new(
            config.imap_server.as_str(),
            config.email_user.as_str(),
            config.email_password.as_str(),
        )
        .with_port(config.imap_port)
        .with_mailbox(config.imap_mailbox.as_str());

        Ok(Self::new(
            IngestPipeline::new(text, entities, store),
            Arc::new(mailbox),
            &config.subject_filter,
            config.fetch_limit,
        ))
    }
}

async fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn ResultStore>> {
    let store: Arc<dyn ResultStore> = match config.store {
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(&config.database_path)
                .await
                .with_context(|| format!("opening {}", config.database_path))?,
        ),
        StoreBackend::Firestore => match (&config.firestore_emulator, &config.google_credentials) {
            (Some(host), _) => {
                let project = config
                    .firestore_project
                    .clone()
                    .unwrap_or_else(|| "demo-termsheet".to_string());
                tracing::warn!(host = %host, project = %project, "Using Firestore emulator without auth");
                Arc::new(FirestoreStore::emulator(host, project))
            }
            (None, Some(path)) => {
                let account = ServiceAccount::from_file(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Arc::new(FirestoreStore::with_service_account(
                    account,
                    config.firestore_project.clone(),
                )?)
            }
            (None, None) => anyhow::bail!("Firestore needs credentials or an emulator host"),
        },
    };

    tracing::info!(backend = store.backend(), "Result store ready");
    Ok(store)
}

fn ocr_engine(config: &ServerConfig) -> TesseractOcr {
    let engine = match &config.tesseract_path {
        Some(path) => TesseractOcr::with_binary(path),
        None => TesseractOcr::locate().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Image and PDF uploads will fail until TESSERACT_PATH is set");
            TesseractOcr::with_binary("tesseract")
        }),
    };
    engine.with_language(config.tesseract_lang.as_str())
}

fn rasterizer(config: &ServerConfig) -> Pdftoppm {
    let rasterizer = match &config.pdftoppm_path {
        Some(path) => Pdftoppm::with_binary(path),
        None => Pdftoppm::locate().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "PDF uploads will fail until PDFTOPPM_PATH is set");
            Pdftoppm::with_binary("pdftoppm")
        }),
    };
    rasterizer.with_dpi(config.pdf_dpi)
}

#[cfg(feature = "onnx-ner")]
fn recognizer(config: &ServerConfig) -> anyhow::Result<Arc<dyn EntityRecognizer>> {
    if let Some(dir) = &config.ner_model_dir {
        let onnx = termsheet_core::ingest::OnnxRecognizer::load(dir)
            .with_context(|| format!("loading NER model from {}", dir.display()))?;
        return Ok(Arc::new(onnx));
    }
    Ok(Arc::new(PatternRecognizer::with_default_patterns()?))
}

#[cfg(not(feature = "onnx-ner"))]
fn recognizer(config: &ServerConfig) -> anyhow::Result<Arc<dyn EntityRecognizer>> {
    if config.ner_model_dir.is_some() {
        tracing::warn!("NER_MODEL_DIR is ignored; built without the onnx-ner feature");
    }
    Ok(Arc::new(PatternRecognizer::with_default_patterns()?))
}
