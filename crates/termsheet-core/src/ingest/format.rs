use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    Webp,
    Pdf,
    Csv,
    Xlsx,
    Xls,
    Ods,
}

impl DocumentFormat {
    /// Spreadsheet formats only. Images and PDFs are never trusted by name.
    pub fn spreadsheet_from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "ods" => Some(Self::Ods),
            _ => None,
        }
    }

    #[must_use]
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Webp => "image/webp",
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Xls => "application/vnd.ms-excel",
            Self::Ods => "application/vnd.oasis.opendocument.spreadsheet",
        }
    }

    #[must_use]
    pub const fn is_image(&self) -> bool {
        matches!(
            self,
            Self::Png | Self::Jpeg | Self::Gif | Self::Bmp | Self::Tiff | Self::Webp
        )
    }

    #[must_use]
    pub const fn is_spreadsheet(&self) -> bool {
        matches!(self, Self::Csv | Self::Xlsx | Self::Xls | Self::Ods)
    }

    /// Identify an image or PDF from its leading bytes.
    #[must_use]
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match data {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'B', b'M', ..] if data.len() >= 14 => Some(Self::Bmp),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(Self::Tiff),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'%', b'P', b'D', b'F', ..] => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Content sniffing first, then the declared filename for spreadsheets.
    #[must_use]
    pub fn detect(data: &[u8], filename: &str) -> Option<Self> {
        Self::sniff(data).or_else(|| {
            Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .and_then(Self::spreadsheet_from_extension)
        })
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime())
    }
}

/// Best-effort MIME name for content we do not handle, used in error messages.
#[must_use]
pub fn describe_unsupported(data: &[u8]) -> &'static str {
    match data {
        [] => "empty",
        [b'P', b'K', 0x03 | 0x05 | 0x07, 0x04 | 0x06 | 0x08, ..] => "application/zip",
        [0x1F, 0x8B, ..] => "application/gzip",
        [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, ..] => "application/x-ole-storage",
        [b'R', b'a', b'r', b'!', ..] => "application/vnd.rar",
        [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, ..] => "application/x-7z-compressed",
        _ if std::str::from_utf8(&data[..data.len().min(512)]).is_ok() => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_images_and_pdf() {
        assert_eq!(
            DocumentFormat::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(DocumentFormat::Png)
        );
        assert_eq!(
            DocumentFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(DocumentFormat::Jpeg)
        );
        assert_eq!(DocumentFormat::sniff(b"GIF89a...."), Some(DocumentFormat::Gif));
        assert_eq!(DocumentFormat::sniff(b"II*\0rest"), Some(DocumentFormat::Tiff));
        assert_eq!(
            DocumentFormat::sniff(b"RIFF\x10\0\0\0WEBPVP8 "),
            Some(DocumentFormat::Webp)
        );
        assert_eq!(DocumentFormat::sniff(b"%PDF-1.7\n"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::sniff(b"hello"), None);
    }

    #[test]
    fn test_sniff_ignores_filename_for_images() {
        // A PNG named .csv is still a PNG
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(
            DocumentFormat::detect(&png, "sheet.csv"),
            Some(DocumentFormat::Png)
        );
        // and a text file named .png is not an image
        assert_eq!(DocumentFormat::detect(b"a,b\n1,2\n", "scan.png"), None);
    }

    #[test]
    fn test_spreadsheet_falls_back_to_extension() {
        assert_eq!(
            DocumentFormat::detect(b"a,b\n1,2\n", "terms.CSV"),
            Some(DocumentFormat::Csv)
        );
        assert_eq!(
            DocumentFormat::detect(b"PK\x03\x04rest", "terms.xlsx"),
            Some(DocumentFormat::Xlsx)
        );
        assert_eq!(DocumentFormat::detect(b"PK\x03\x04rest", "bundle.zip"), None);
    }

    #[test]
    fn test_describe_unsupported() {
        assert_eq!(describe_unsupported(b"PK\x03\x04rest"), "application/zip");
        assert_eq!(describe_unsupported(b"plain words"), "text/plain");
        assert_eq!(describe_unsupported(&[0x00, 0xFF, 0xFE, 0x80]), "application/octet-stream");
        assert_eq!(describe_unsupported(&[]), "empty");
    }

    #[test]
    fn test_format_kinds() {
        assert!(DocumentFormat::Tiff.is_image());
        assert!(!DocumentFormat::Pdf.is_image());
        assert!(DocumentFormat::Ods.is_spreadsheet());
        assert_eq!(DocumentFormat::Pdf.to_string(), "application/pdf");
    }
}
