use serde::{Deserialize, Serialize};

/// Broad upload categories the document service accepts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Pdf,
    Image,
    Unsupported,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Result of format detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatDetection {
    pub mime_type: String,
    pub category: FileCategory,
    pub byte_len: usize,
    /// Set when the category is `Unsupported`.
    pub rejection: Option<String>,
}

impl FormatDetection {
    fn unsupported(mime_type: &str, byte_len: usize, reason: String) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            category: FileCategory::Unsupported,
            byte_len,
            rejection: Some(reason),
        }
    }
}

/// Detect the upload format from magic bytes (NOT file names or declared
/// content types). Empty or oversized input is unsupported.
pub fn detect_format(bytes: &[u8], max_bytes: usize) -> FormatDetection {
    let byte_len = bytes.len();

    if byte_len == 0 {
        return FormatDetection::unsupported("unknown", 0, "document is empty".into());
    }
    if byte_len > max_bytes {
        return FormatDetection::unsupported(
            "unknown",
            byte_len,
            format!("document is {byte_len} bytes, limit is {max_bytes}"),
        );
    }

    let (mime_type, category) = match bytes {
        // PDF: starts with %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => ("application/pdf", FileCategory::Pdf),
        // JPEG: starts with FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => ("image/jpeg", FileCategory::Image),
        // PNG: starts with 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => ("image/png", FileCategory::Image),
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => {
            ("image/tiff", FileCategory::Image)
        }
        // GIF87a / GIF89a
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => ("image/gif", FileCategory::Image),
        // WEBP: RIFF....WEBP
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
            ("image/webp", FileCategory::Image)
        }
        // BMP: starts with BM
        [b'B', b'M', ..] if byte_len >= 14 => ("image/bmp", FileCategory::Image),
        _ => {
            return FormatDetection::unsupported(
                "application/octet-stream",
                byte_len,
                "not a PDF or a supported image format".into(),
            );
        }
    };

    FormatDetection {
        mime_type: mime_type.to_string(),
        category,
        byte_len,
        rejection: None,
    }
}
