use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF tool not found: {0}")]
    ToolNotFound(String),
    #[error("Malformed PDF: {0}")]
    Malformed(String),
    #[error("PDF rendering failed: {0}")]
    RenderFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PdfResult<T> = Result<T, PdfError>;

/// Number of pages in the document's page tree.
pub fn page_count(pdf: &[u8]) -> PdfResult<usize> {
    let doc = lopdf::Document::load_mem(pdf).map_err(|e| PdfError::Malformed(e.to_string()))?;
    Ok(doc.get_pages().len())
}

/// Renders each page of a PDF to a PNG, in page order.
#[async_trait::async_trait]
pub trait PdfRasterizer: Send + Sync {
    async fn rasterize(&self, pdf: &[u8]) -> PdfResult<Vec<Vec<u8>>>;
}

/// Poppler's `pdftoppm`, run against a scratch copy of the document.
pub struct Pdftoppm {
    binary: PathBuf,
    dpi: u32,
}

impl Pdftoppm {
    pub fn locate() -> PdfResult<Self> {
        let binary = which::which("pdftoppm")
            .map_err(|e| PdfError::ToolNotFound(format!("pdftoppm: {e}")))?;
        Ok(Self::with_binary(binary))
    }

    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            dpi: 200,
        }
    }

    #[must_use]
    pub const fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait::async_trait]
impl PdfRasterizer for Pdftoppm {
    async fn rasterize(&self, pdf: &[u8]) -> PdfResult<Vec<Vec<u8>>> {
        if page_count(pdf)? == 0 {
            return Ok(Vec::new());
        }

        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("input.pdf");
        tokio::fs::write(&input, pdf).await?;

        let prefix = scratch.path().join("page");
        let output = Command::new(&self.binary)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(&input)
            .arg(&prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PdfError::RenderFailed(format!("{}: {e}", self.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PdfError::RenderFailed(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let pages = collect_pages(scratch.path()).await?;
        tracing::debug!(pages = pages.len(), dpi = self.dpi, "Rasterized PDF");
        Ok(pages)
    }
}

/// Read `page-N.png` files back in numeric order. pdftoppm zero-pads N to the
/// width of the page count, so lexical order is not enough.
async fn collect_pages(dir: &Path) -> PdfResult<Vec<Vec<u8>>> {
    let mut numbered = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(number) = page_number(&path) {
            numbered.push((number, path));
        }
    }

    numbered.sort_by_key(|(n, _)| *n);

    let mut pages = Vec::with_capacity(numbered.len());
    for (_, path) in numbered {
        pages.push(tokio::fs::read(&path).await?);
    }
    Ok(pages)
}

fn page_number(path: &Path) -> Option<u32> {
    if path.extension()?.to_str()? != "png" {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("page-")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Object};

    /// A structurally valid PDF with `pages` blank pages.
    fn blank_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                Object::Reference(doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(612),
                        Object::Integer(792),
                    ],
                }))
            })
            .collect();

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => i64::try_from(pages).unwrap(),
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(&blank_pdf(0)).unwrap(), 0);
        assert_eq!(page_count(&blank_pdf(3)).unwrap(), 3);
    }

    #[test]
    fn test_page_count_rejects_garbage() {
        assert!(matches!(
            page_count(b"this is not a pdf"),
            Err(PdfError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_pages_skips_renderer() {
        // The binary does not exist; an empty page tree must never reach it.
        let rasterizer = Pdftoppm::with_binary("/nonexistent/pdftoppm");
        let pages = rasterizer.rasterize(&blank_pdf(0)).await.unwrap();
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn test_missing_renderer_fails() {
        let rasterizer = Pdftoppm::with_binary("/nonexistent/pdftoppm");
        let result = rasterizer.rasterize(&blank_pdf(1)).await;
        assert!(matches!(result, Err(PdfError::RenderFailed(_))));
    }

    #[tokio::test]
    async fn test_collect_pages_orders_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [
            ("page-10.png", "ten"),
            ("page-02.png", "two"),
            ("page-1.png", "one"),
            ("input.pdf", "skip"),
        ] {
            std::fs::write(dir.path().join(name), body).unwrap();
        }

        let pages = collect_pages(dir.path()).await.unwrap();
        assert_eq!(pages, vec![b"one".to_vec(), b"two".to_vec(), b"ten".to_vec()]);
    }
}
