//! Mailbox access and RFC 822 message parsing.

use std::collections::HashSet;
use std::sync::Arc;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Connection failed: {0}")]
    Connect(std::io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("IMAP error: {0}")]
    Imap(#[from] async_imap::error::Error),
    #[error("Unparseable message: {0}")]
    Parse(String),
}

pub type MailResult<T> = Result<T, MailError>;

/// Somewhere raw messages can be fetched from by subject.
#[async_trait::async_trait]
pub trait MailSource: Send + Sync {
    /// The newest `limit` messages whose subject contains `subject`, oldest
    /// first, as raw RFC 822 bytes.
    async fn fetch_matching(&self, subject: &str, limit: usize) -> MailResult<Vec<Vec<u8>>>;
}

/// IMAP over implicit TLS.
pub struct ImapMailbox {
    host: String,
    port: u16,
    username: String,
    password: String,
    mailbox: String,
}

impl ImapMailbox {
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 993,
            username: username.into(),
            password: password.into(),
            mailbox: "INBOX".to_string(),
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = mailbox.into();
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    fn tls_connector() -> MailResult<TlsConnector> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| MailError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(TlsConnector::from(Arc::new(config)))
    }
}

#[async_trait::async_trait]
impl MailSource for ImapMailbox {
    async fn fetch_matching(&self, subject: &str, limit: usize) -> MailResult<Vec<Vec<u8>>> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(MailError::Connect)?;

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| MailError::Tls(format!("{}: {e}", self.host)))?;
        let tls = Self::tls_connector()?
            .connect(server_name, tcp)
            .await
            .map_err(MailError::Connect)?;

        let client = async_imap::Client::new(tls);
        let mut session = client
            .login(&self.username, &self.password)
            .await
            .map_err(|(e, _)| e)?;

        session.select(&self.mailbox).await?;

        let found = session.search(search_query(subject)).await?;
        let wanted = newest(found, limit);
        tracing::info!(
            host = %self.host,
            mailbox = %self.mailbox,
            matched = wanted.len(),
            "Searched mailbox"
        );

        let mut messages = Vec::with_capacity(wanted.len());
        for seq in wanted {
            let fetched: Vec<_> = session
                .fetch(seq.to_string(), "RFC822")
                .await?
                .try_collect()
                .await?;

            messages.extend(fetched.iter().filter_map(|f| f.body().map(<[u8]>::to_vec)));
        }

        session.logout().await?;
        Ok(messages)
    }
}

fn search_query(subject: &str) -> String {
    let escaped = subject.replace('\\', "\\\\").replace('"', "\\\"");
    format!("SUBJECT \"{escaped}\"")
}

/// The `limit` highest sequence numbers, ascending.
fn newest(found: HashSet<u32>, limit: usize) -> Vec<u32> {
    let mut ids: Vec<u32> = found.into_iter().collect();
    ids.sort_unstable();
    ids.split_off(ids.len().saturating_sub(limit))
}

/// The parts of a message worth keeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEmail {
    pub subject: Option<String>,
    pub sender: Option<String>,
    /// First text body; empty when the message has none.
    pub body: String,
}

pub fn parse_message(raw: &[u8]) -> MailResult<ParsedEmail> {
    let message = mail_parser::MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Parse("no headers or body found".into()))?;

    let sender = message.from().and_then(|from| from.first()).and_then(|addr| {
        match (addr.name(), addr.address()) {
            (Some(name), Some(address)) => Some(format!("{name} <{address}>")),
            (None, Some(address)) => Some(address.to_string()),
            (Some(name), None) => Some(name.to_string()),
            (None, None) => None,
        }
    });

    Ok(ParsedEmail {
        subject: message.subject().map(str::to_string),
        sender,
        body: message
            .body_text(0)
            .map(|text| text.into_owned())
            .unwrap_or_default(),
    })
}
