use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR tool not found: {0}")]
    ToolNotFound(String),
    #[error("OCR engine failed: {0}")]
    EngineFailed(String),
    #[error("Image decoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type OcrResult<T> = Result<T, OcrError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    /// 0-100, or negative when the engine gave no score.
    pub confidence: f64,
}

/// Recognized text of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    pub text: String,
    /// Mean of the scored words, 0-100. Zero when nothing was scored.
    pub confidence: f64,
    pub words: Vec<OcrWord>,
}

impl OcrPage {
    #[must_use]
    pub fn from_words(words: Vec<OcrWord>) -> Self {
        let text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let scored: Vec<f64> = words
            .iter()
            .map(|w| w.confidence)
            .filter(|c| c.is_finite() && *c >= 0.0)
            .collect();

        let confidence = if scored.is_empty() {
            0.0
        } else {
            (scored.iter().sum::<f64>() / scored.len() as f64).clamp(0.0, 100.0)
        };

        Self {
            text,
            confidence,
            words,
        }
    }

    /// Parse Tesseract TSV output.
    ///
    /// Columns: level page_num block_num par_num line_num word_num left top
    /// width height conf text. Only level 5 rows are words.
    #[must_use]
    pub fn from_tsv(tsv: &str) -> Self {
        let mut words = Vec::new();

        for line in tsv.lines().skip(1) {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 12 {
                continue;
            }

            if fields[0].trim() != "5" {
                continue;
            }

            let text = fields[11].trim();
            if text.is_empty() {
                continue;
            }

            let confidence = fields[10].trim().parse::<f64>().unwrap_or(-1.0);

            words.push(OcrWord {
                text: text.to_string(),
                confidence,
            });
        }

        Self::from_words(words)
    }
}

/// Turns an image into words.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// `png` is always PNG-encoded; callers normalize other formats first.
    async fn recognize(&self, png: &[u8]) -> OcrResult<OcrPage>;
}

/// Decode any supported raster format and re-encode it as PNG.
pub fn to_png(data: &[u8]) -> OcrResult<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Runs the `tesseract` binary in TSV mode, feeding the image through stdin.
pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
}

impl TesseractOcr {
    /// Find `tesseract` on `PATH`.
    pub fn locate() -> OcrResult<Self> {
        let binary = which::which("tesseract")
            .map_err(|e| OcrError::ToolNotFound(format!("tesseract: {e}")))?;
        Ok(Self::with_binary(binary))
    }

    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            language: "eng".to_string(),
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }
}

#[async_trait::async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, png: &[u8]) -> OcrResult<OcrPage> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", self.language.as_str(), "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::EngineFailed(format!("{}: {e}", self.binary.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::EngineFailed("tesseract stdin unavailable".into()))?;

        let feed = async move {
            let written = stdin.write_all(png).await;
            drop(stdin);
            written
        };

        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::EngineFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        written?;

        let tsv = String::from_utf8_lossy(&output.stdout);
        let page = OcrPage::from_tsv(&tsv);

        tracing::debug!(
            words = page.words.len(),
            confidence = page.confidence,
            "Tesseract recognized image"
        );

        Ok(page)
    }
}
