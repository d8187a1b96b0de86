mod extractor;
mod format;
mod ner;
mod ocr;
mod pdf;
mod pipeline;
mod spreadsheet;
mod text;

pub use extractor::{
    ClausePattern, ClauseSet, EntityError, EntityExtractor, EntityPattern, EntityRecognizer,
    EntityResult, NoopRecognizer, PatternRecognizer, RecognizedSpan, TERM_SHEET_CLAUSES,
};
pub use format::{describe_unsupported, DocumentFormat};
#[cfg(feature = "onnx-ner")]
pub use ner::OnnxRecognizer;
pub use ner::{merge_bio, normalize_label};
pub use ocr::{to_png, OcrEngine, OcrError, OcrPage, OcrResult, OcrWord, TesseractOcr};
pub use pdf::{page_count, PdfError, PdfRasterizer, PdfResult, Pdftoppm};
pub use pipeline::{IngestError, IngestPipeline, IngestResult};
pub use spreadsheet::{read_csv, read_workbook, SpreadsheetError, SpreadsheetResult, Table};
pub use text::{ExtractedText, TextError, TextExtractor, TextResult};
