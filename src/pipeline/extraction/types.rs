use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::ExtractionError;
use crate::models::{DocumentRecord, DocumentType};

/// One entity as reported by the document-understanding service.
#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct RawEntity {
    /// Service-specific entity type, e.g. "Given Names".
    pub kind: String,
    pub value: String,
    pub confidence: f32,
}

impl RawEntity {
    pub fn new(kind: impl Into<String>, value: impl Into<String>, confidence: f32) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
            confidence,
        }
    }
}

impl fmt::Debug for RawEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawEntity")
            .field("kind", &self.kind)
            .field("value", &"[REDACTED]")
            .field("confidence", &self.confidence)
            .finish()
    }
}

/// Service output before normalization into a record.
#[derive(Clone, Default, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct RawExtraction {
    pub entities: Vec<RawEntity>,
    /// Full OCR text, used when the service found no entities.
    pub text: String,
    pub page_confidences: Vec<f32>,
}

impl fmt::Debug for RawExtraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawExtraction")
            .field("entities", &self.entities)
            .field("text", &format_args!("[{} chars]", self.text.len()))
            .field("page_confidences", &self.page_confidences)
            .finish()
    }
}

/// Everything the service needs for one call. Borrowed: the adapter never
/// holds document bytes past the call.
#[derive(Clone, Copy)]
pub struct ServiceRequest<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
    pub type_hint: DocumentType,
    pub timeout: Duration,
}

/// Document-understanding service abstraction (allows mocking for tests)
pub trait DocumentService {
    fn process(&self, request: &ServiceRequest<'_>) -> Result<RawExtraction, ExtractionError>;

    /// Short identifier for logs.
    fn name(&self) -> &str;
}

impl<T: DocumentService + ?Sized> DocumentService for Arc<T> {
    fn process(&self, request: &ServiceRequest<'_>) -> Result<RawExtraction, ExtractionError> {
        (**self).process(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Extraction Adapter contract: bytes + type hint in, record out.
pub trait DocumentExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        type_hint: DocumentType,
        timeout: Duration,
    ) -> Result<DocumentRecord, ExtractionError>;
}
