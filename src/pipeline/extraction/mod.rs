pub mod confidence;
pub mod document_ai;
pub mod google_auth;
pub mod normalize;
pub mod orchestrator;
pub mod types;

pub use confidence::*;
pub use document_ai::*;
pub use google_auth::AccessTokenSource;
pub use normalize::*;
pub use orchestrator::*;
pub use types::*;

use thiserror::Error;

use crate::models::DocumentRecord;

#[derive(Error, Debug, Clone)]
pub enum ExtractionError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Document service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Recoverable: the record was built, but the required fields were read
    /// with too little certainty to trust without a human look.
    #[error("Required-field confidence {aggregate:.2} is below threshold {threshold:.2}")]
    LowConfidenceExtraction {
        record: Box<DocumentRecord>,
        aggregate: f32,
        threshold: f32,
    },

    #[error("No fields could be extracted from the document")]
    NoFieldsExtracted,
}

impl ExtractionError {
    /// Only low-confidence extraction lets the run continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LowConfidenceExtraction { .. })
    }

    /// Stable machine-readable code for API bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Self::ServiceUnavailable(_) => "EXTRACTION_UNAVAILABLE",
            Self::LowConfidenceExtraction { .. } => "LOW_CONFIDENCE_EXTRACTION",
            Self::NoFieldsExtracted => "NO_FIELDS_EXTRACTED",
        }
    }
}
