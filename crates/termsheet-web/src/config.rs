use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// Which persistence back-end results go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Firestore,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "firestore" => Ok(Self::Firestore),
            other => bail!("unknown store backend {other:?} (expected sqlite or firestore)"),
        }
    }
}

/// Server configuration, read from the environment (and `.env`).
#[derive(Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub store: StoreBackend,
    pub database_path: String,
    pub google_credentials: Option<PathBuf>,
    pub firestore_project: Option<String>,
    pub firestore_emulator: Option<String>,

    pub imap_server: String,
    pub imap_port: u16,
    pub imap_mailbox: String,
    pub email_user: String,
    pub email_password: String,
    pub subject_filter: String,
    pub fetch_limit: usize,

    pub tesseract_path: Option<PathBuf>,
    pub tesseract_lang: String,
    pub pdftoppm_path: Option<PathBuf>,
    pub pdf_dpi: u32,
    pub ner_model_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("store", &self.store)
            .field("database_path", &self.database_path)
            .field("firestore_project", &self.firestore_project)
            .field("firestore_emulator", &self.firestore_emulator)
            .field("imap_server", &self.imap_server)
            .field("imap_port", &self.imap_port)
            .field("imap_mailbox", &self.imap_mailbox)
            .field("email_user", &self.email_user)
            .field("email_password", &"<redacted>")
            .field("subject_filter", &self.subject_filter)
            .field("fetch_limit", &self.fetch_limit)
            .field("tesseract_lang", &self.tesseract_lang)
            .field("pdf_dpi", &self.pdf_dpi)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            bind: var("TERMSHEET_BIND")
                .unwrap_or_else(|| "0.0.0.0:8000".to_string())
                .parse()
                .context("TERMSHEET_BIND must be a socket address")?,
            store: var("TERMSHEET_STORE")
                .map_or(Ok(StoreBackend::Sqlite), |v| v.parse())
                .context("TERMSHEET_STORE")?,
            database_path: var("TERMSHEET_DB").unwrap_or_else(|| "termsheets.db".to_string()),
            google_credentials: var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            firestore_project: var("FIRESTORE_PROJECT_ID"),
            firestore_emulator: var("FIRESTORE_EMULATOR_HOST"),

            imap_server: var("IMAP_SERVER").unwrap_or_else(|| "imap.gmail.com".to_string()),
            imap_port: parse_or(var("IMAP_PORT"), 993).context("IMAP_PORT must be a port number")?,
            imap_mailbox: var("IMAP_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
            email_user: var("EMAIL_USER").context("EMAIL_USER must be set")?,
            email_password: var("EMAIL_PASSWORD").context("EMAIL_PASSWORD must be set")?,
            subject_filter: var("EMAIL_SUBJECT_FILTER").unwrap_or_else(|| "Term Sheet".to_string()),
            fetch_limit: parse_or(var("EMAIL_FETCH_LIMIT"), 5)
                .context("EMAIL_FETCH_LIMIT must be a number")?,

            tesseract_path: var("TESSERACT_PATH").map(PathBuf::from),
            tesseract_lang: var("TESSERACT_LANG").unwrap_or_else(|| "eng".to_string()),
            pdftoppm_path: var("PDFTOPPM_PATH").map(PathBuf::from),
            pdf_dpi: parse_or(var("PDF_DPI"), 200).context("PDF_DPI must be a number")?,
            ner_model_dir: var("NER_MODEL_DIR").map(PathBuf::from),
            max_upload_bytes: parse_or(var("MAX_UPLOAD_BYTES"), 25 * 1024 * 1024)
                .context("MAX_UPLOAD_BYTES must be a number")?,
        };

        if config.store == StoreBackend::Firestore
            && config.firestore_emulator.is_none()
            && config.google_credentials.is_none()
        {
            bail!("GOOGLE_APPLICATION_CREDENTIALS must be set when TERMSHEET_STORE=firestore");
        }

        Ok(config)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.map_or(Ok(default), |v| v.trim().parse().map_err(Into::into))
}
