use std::time::Duration;

use chrono::Utc;

use super::confidence::{low_confidence_fields, missing_required_fields, required_field_confidence};
use super::normalize::normalize_extraction;
use super::types::{DocumentExtractor, DocumentService, ServiceRequest};
use super::ExtractionError;
use crate::config::ExtractionConfig;
use crate::models::{DocumentRecord, DocumentType, RecordError};
use crate::pipeline::import::{detect_format, source_ref};

/// Extraction Adapter: detect format → one service call → normalize →
/// validate → confidence gate.
/// The document-understanding service is injected, enabling mocks in tests.
pub struct ExtractionAdapter {
    service: Box<dyn DocumentService + Send + Sync>,
    config: ExtractionConfig,
}

impl ExtractionAdapter {
    pub fn new(service: Box<dyn DocumentService + Send + Sync>, config: ExtractionConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }
}

impl DocumentExtractor for ExtractionAdapter {
    fn extract(
        &self,
        bytes: &[u8],
        type_hint: DocumentType,
        timeout: Duration,
    ) -> Result<DocumentRecord, ExtractionError> {
        let _span = tracing::info_span!(
            "extract_document",
            service = self.service.name(),
            document_type = %type_hint,
            size = bytes.len(),
        )
        .entered();

        // Step 1: Reject what the service cannot read before paying for a call
        let format = detect_format(bytes, self.config.max_document_bytes);
        if !format.category.is_supported() {
            let reason = format
                .rejection
                .unwrap_or_else(|| "unrecognized content".to_string());
            tracing::warn!(reason = %reason, "Unsupported document format");
            return Err(ExtractionError::UnsupportedFormat(reason));
        }

        // Step 2: Single outbound call. No retry here: OCR calls are costly
        // and a duplicate would be billed twice.
        let request = ServiceRequest {
            bytes,
            mime_type: &format.mime_type,
            type_hint,
            timeout,
        };
        let raw = self.service.process(&request)?;

        // Step 3: Canonical field map
        let fields = normalize_extraction(&raw);
        drop(raw);
        if fields.is_empty() {
            tracing::warn!("Service returned nothing recognizable");
            return Err(ExtractionError::NoFieldsExtracted);
        }

        let aggregate = required_field_confidence(&fields, &self.config.required_fields);
        let missing: Vec<String> = missing_required_fields(&fields, &self.config.required_fields)
            .into_iter()
            .map(str::to_string)
            .collect();
        let low_count =
            low_confidence_fields(&fields, self.config.min_required_confidence).len();

        // Step 4: Build the record (enforces the record invariants)
        let record = DocumentRecord::new(
            type_hint,
            fields,
            source_ref(bytes, &format.mime_type),
            Utc::now(),
        )
        .map_err(|e| match e {
            RecordError::NoFields => ExtractionError::NoFieldsExtracted,
            // Normalization clamps every confidence, so this is a service bug
            RecordError::ConfidenceOutOfRange { .. } => {
                ExtractionError::ServiceUnavailable(e.to_string())
            }
        })?;

        tracing::info!(
            record_id = %record.id(),
            fields = record.fields().len(),
            low_confidence_fields = low_count,
            missing = ?missing,
            aggregate,
            "Extraction complete"
        );

        // Step 5: Confidence gate
        let threshold = self.config.min_required_confidence;
        if aggregate < threshold {
            tracing::warn!(
                record_id = %record.id(),
                aggregate,
                threshold,
                "Required-field confidence below threshold"
            );
            return Err(ExtractionError::LowConfidenceExtraction {
                record: Box::new(record),
                aggregate,
                threshold,
            });
        }

        Ok(record)
    }
}
