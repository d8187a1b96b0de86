use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format::{describe_unsupported, DocumentFormat};
use super::ocr::{to_png, OcrEngine, OcrError};
use super::pdf::{PdfError, PdfRasterizer};
use super::spreadsheet::{read_csv, read_workbook, SpreadsheetError};

#[derive(Debug, Error)]
pub enum TextError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Nothing to extract: {0}")]
    EmptyExtraction(String),
    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("PDF failed: {0}")]
    Pdf(#[from] PdfError),
    #[error("Spreadsheet failed: {0}")]
    Spreadsheet(SpreadsheetError),
}

impl From<SpreadsheetError> for TextError {
    fn from(e: SpreadsheetError) -> Self {
        match e {
            SpreadsheetError::Empty => Self::EmptyExtraction("spreadsheet has no rows".into()),
            other => Self::Spreadsheet(other),
        }
    }
}

pub type TextResult<T> = Result<T, TextError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub format: DocumentFormat,
    pub text: String,
    /// 0-100. Zero for inputs that never went through OCR.
    pub confidence: f64,
    pub page_count: usize,
}

/// Turns document bytes into plain text, picking a strategy by format.
pub struct TextExtractor {
    ocr: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PdfRasterizer>,
}

impl TextExtractor {
    #[must_use]
    pub fn new(ocr: Arc<dyn OcrEngine>, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        Self { ocr, rasterizer }
    }

    pub async fn extract(&self, data: &[u8], filename: &str) -> TextResult<ExtractedText> {
        let format = DocumentFormat::detect(data, filename).ok_or_else(|| {
            TextError::UnsupportedFileType(describe_unsupported(data).to_string())
        })?;

        match format {
            f if f.is_image() => self.extract_image(data, f).await,
            DocumentFormat::Pdf => self.extract_pdf(data).await,
            DocumentFormat::Csv => Ok(tabular(format, read_csv(data)?.render())),
            _ => Ok(tabular(format, read_workbook(data)?.render())),
        }
    }

    async fn extract_image(&self, data: &[u8], format: DocumentFormat) -> TextResult<ExtractedText> {
        let png = if format == DocumentFormat::Png {
            data.to_vec()
        } else {
            to_png(data)?
        };

        let page = self.ocr.recognize(&png).await?;

        Ok(ExtractedText {
            format,
            text: page.text,
            confidence: page.confidence,
            page_count: 1,
        })
    }

    async fn extract_pdf(&self, data: &[u8]) -> TextResult<ExtractedText> {
        let pages = self.rasterizer.rasterize(data).await?;
        if pages.is_empty() {
            return Err(TextError::EmptyExtraction("PDF has no pages".into()));
        }

        let mut text = String::new();
        let mut confidence_sum = 0.0;

        for (number, png) in pages.iter().enumerate() {
            let page = self.ocr.recognize(png).await?;
            tracing::debug!(
                page = number + 1,
                confidence = page.confidence,
                "OCR page complete"
            );
            text.push_str(&page.text);
            text.push('\n');
            confidence_sum += page.confidence;
        }

        Ok(ExtractedText {
            format: DocumentFormat::Pdf,
            text,
            confidence: confidence_sum / pages.len() as f64,
            page_count: pages.len(),
        })
    }
}

fn tabular(format: DocumentFormat, text: String) -> ExtractedText {
    ExtractedText {
        format,
        text,
        confidence: 0.0,
        page_count: 1,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingest::ocr::{OcrPage, OcrResult, OcrWord};
    use crate::ingest::pdf::PdfResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the same words for every image and counts calls.
    pub(crate) struct FixedOcr {
        words: Vec<(&'static str, f64)>,
        pub(crate) calls: AtomicUsize,
    }

    impl FixedOcr {
        pub(crate) fn new(words: Vec<(&'static str, f64)>) -> Self {
            Self {
                words,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl OcrEngine for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn recognize(&self, png: &[u8]) -> OcrResult<OcrPage> {
            assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OcrPage::from_words(
                self.words
                    .iter()
                    .map(|(t, c)| OcrWord {
                        text: (*t).to_string(),
                        confidence: *c,
                    })
                    .collect(),
            ))
        }
    }

    /// Pretends every PDF has `pages` pages.
    pub(crate) struct FixedPages(pub(crate) usize);

    #[async_trait::async_trait]
    impl PdfRasterizer for FixedPages {
        async fn rasterize(&self, _pdf: &[u8]) -> PdfResult<Vec<Vec<u8>>> {
            Ok(vec![tiny_png(); self.0])
        }
    }

    pub(crate) fn tiny_png() -> Vec<u8> {
        encode(image::ImageFormat::Png)
    }

    fn encode(format: image::ImageFormat) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 0]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, format)
            .unwrap();
        buf.into_inner()
    }

    fn extractor(words: Vec<(&'static str, f64)>, pages: usize) -> TextExtractor {
        TextExtractor::new(Arc::new(FixedOcr::new(words)), Arc::new(FixedPages(pages)))
    }

    #[tokio::test]
    async fn test_image_text_and_confidence() {
        let extractor = extractor(vec![("Series", 90.0), ("A", 70.0), ("", -1.0)], 0);

        let out = extractor.extract(&tiny_png(), "scan.png").await.unwrap();

        assert_eq!(out.format, DocumentFormat::Png);
        assert!(!out.text.is_empty());
        assert!(out.text.starts_with("Series A"));
        assert!((out.confidence - 80.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&out.confidence));
    }

    #[tokio::test]
    async fn test_non_png_images_are_normalized() {
        let extractor = extractor(vec![("ok", 50.0)], 0);
        let jpeg = encode(image::ImageFormat::Jpeg);

        let out = extractor.extract(&jpeg, "photo.jpg").await.unwrap();

        assert_eq!(out.format, DocumentFormat::Jpeg);
        assert_eq!(out.text, "ok");
    }

    #[tokio::test]
    async fn test_pdf_pages_joined_with_newlines() {
        let extractor = extractor(vec![("page", 60.0)], 3);

        let out = extractor
            .extract(b"%PDF-1.7 stub", "terms.pdf")
            .await
            .unwrap();

        assert_eq!(out.text, "page\npage\npage\n");
        assert_eq!(out.page_count, 3);
        assert!((out.confidence - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_page_pdf_is_empty_extraction() {
        let extractor = extractor(vec![("never", 1.0)], 0);

        let result = extractor.extract(b"%PDF-1.7 stub", "empty.pdf").await;

        assert!(matches!(result, Err(TextError::EmptyExtraction(_))));
    }

    #[tokio::test]
    async fn test_csv_has_zero_confidence() {
        let extractor = extractor(vec![], 0);

        let out = extractor
            .extract(b"clause,text\nlaw,governed by the laws of Delaware\n", "terms.csv")
            .await
            .unwrap();

        assert_eq!(out.format, DocumentFormat::Csv);
        assert!(out.text.contains("governed by the laws of Delaware"));
        assert!((out.confidence - 0.0).abs() < f64::EPSILON);
    }

    fn terms_workbook() -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "clause").unwrap();
        sheet.write_string(0, 1, "text").unwrap();
        sheet.write_string(1, 0, "law").unwrap();
        sheet
            .write_string(1, 1, "governed by the laws of Delaware")
            .unwrap();
        sheet.write_string(2, 0, "stake").unwrap();
        sheet.write_number(2, 1, 20).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[tokio::test]
    async fn test_xlsx_renders_first_sheet() {
        let extractor = extractor(vec![], 0);

        let out = extractor
            .extract(&terms_workbook(), "terms.xlsx")
            .await
            .unwrap();

        assert_eq!(out.format, DocumentFormat::Xlsx);
        let lines: Vec<&str> = out.text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("   clause"));
        assert!(lines[0].ends_with("text"));
        assert_eq!(lines[1], "0     law  governed by the laws of Delaware");
        assert!(lines[2].starts_with("1   stake"));
        assert!(lines[2].ends_with("20"));
        assert!((out.confidence - 0.0).abs() < f64::EPSILON);
    }

    /// Hands out one confidence per page, in order.
    struct PerPageOcr {
        confidences: Vec<f64>,
        next: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl OcrEngine for PerPageOcr {
        fn name(&self) -> &str {
            "per-page"
        }

        async fn recognize(&self, _png: &[u8]) -> OcrResult<OcrPage> {
            let page = self.next.fetch_add(1, Ordering::SeqCst);
            Ok(OcrPage::from_words(vec![OcrWord {
                text: format!("page{page}"),
                confidence: self.confidences[page],
            }]))
        }
    }

    #[tokio::test]
    async fn test_pdf_confidence_is_mean_of_pages() {
        let ocr = PerPageOcr {
            confidences: vec![60.0, 90.0],
            next: AtomicUsize::new(0),
        };
        let extractor = TextExtractor::new(Arc::new(ocr), Arc::new(FixedPages(2)));

        let out = extractor
            .extract(b"%PDF-1.7 stub", "terms.pdf")
            .await
            .unwrap();

        assert_eq!(out.text, "page0\npage1\n");
        assert!((out.confidence - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zip_is_unsupported() {
        let extractor = extractor(vec![], 0);

        let result = extractor.extract(b"PK\x03\x04\x14\0\0\0", "bundle.zip").await;

        match result {
            Err(TextError::UnsupportedFileType(kind)) => assert_eq!(kind, "application/zip"),
            other => panic!("expected UnsupportedFileType, got {other:?}"),
        }
    }
}
