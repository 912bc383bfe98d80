use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::enums::DocumentType;

/// One recognized value and the extractor's certainty in it.
/// Values are identity data: wiped on drop and redacted from `Debug`.
#[derive(Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ExtractedField {
    pub value: String,
    pub confidence: f32,
}

impl ExtractedField {
    pub fn new(value: impl Into<String>, confidence: f32) -> Self {
        Self {
            value: value.into(),
            confidence,
        }
    }
}

impl fmt::Debug for ExtractedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedField")
            .field("value", &format_args!("[{} chars]", self.value.chars().count()))
            .field("confidence", &self.confidence)
            .finish()
    }
}

/// Opaque handle to the uploaded bytes. The bytes themselves are never kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Base64 SHA-256 of the document content.
    pub content_hash: String,
    pub byte_len: usize,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("Document record has no extracted fields")]
    NoFields,

    #[error("Field '{field}' has confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { field: String, confidence: f32 },
}

/// Structured KYC record for one submitted identity document.
///
/// Construction enforces the record invariants: at least one field, and
/// every confidence within [0, 1]. Read-only after creation.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    id: Uuid,
    document_type: DocumentType,
    fields: BTreeMap<String, ExtractedField>,
    source: SourceRef,
    extracted_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(
        document_type: DocumentType,
        fields: BTreeMap<String, ExtractedField>,
        source: SourceRef,
        extracted_at: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        if fields.is_empty() {
            return Err(RecordError::NoFields);
        }

        if let Some((name, field)) = fields
            .iter()
            .find(|(_, f)| !(0.0..=1.0).contains(&f.confidence))
        {
            return Err(RecordError::ConfidenceOutOfRange {
                field: name.clone(),
                confidence: field.confidence,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            document_type,
            fields,
            source,
            extracted_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn fields(&self) -> &BTreeMap<String, ExtractedField> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.get(name)
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn extracted_at(&self) -> DateTime<Utc> {
        self.extracted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceRef {
        SourceRef {
            content_hash: "hash".into(),
            byte_len: 42,
            mime_type: "image/png".into(),
        }
    }

    fn fields(pairs: &[(&str, &str, f32)]) -> BTreeMap<String, ExtractedField> {
        pairs
            .iter()
            .map(|(k, v, c)| (k.to_string(), ExtractedField::new(*v, *c)))
            .collect()
    }

    #[test]
    fn valid_record_is_built() {
        let record = DocumentRecord::new(
            DocumentType::Passport,
            fields(&[("full_name", "Jane Roe", 0.95), ("document_number", "X123", 1.0)]),
            source(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(record.document_type(), DocumentType::Passport);
        assert_eq!(record.fields().len(), 2);
        assert_eq!(record.field("full_name").unwrap().value, "Jane Roe");
        assert_eq!(record.source().byte_len, 42);
    }

    #[test]
    fn empty_record_is_rejected() {
        let result = DocumentRecord::new(
            DocumentType::License,
            BTreeMap::new(),
            source(),
            Utc::now(),
        );
        assert_eq!(result.unwrap_err(), RecordError::NoFields);
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let result = DocumentRecord::new(
            DocumentType::NationalId,
            fields(&[("full_name", "Jane Roe", 1.2)]),
            source(),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(RecordError::ConfidenceOutOfRange { ref field, .. }) if field == "full_name"
        ));
    }

    #[test]
    fn nan_confidence_is_rejected() {
        let result = DocumentRecord::new(
            DocumentType::NationalId,
            fields(&[("sex", "F", f32::NAN)]),
            source(),
            Utc::now(),
        );
        assert!(matches!(result, Err(RecordError::ConfidenceOutOfRange { .. })));
    }

    #[test]
    fn records_get_distinct_ids() {
        let a = DocumentRecord::new(
            DocumentType::Passport,
            fields(&[("full_name", "A", 0.9)]),
            source(),
            Utc::now(),
        )
        .unwrap();
        let b = DocumentRecord::new(
            DocumentType::Passport,
            fields(&[("full_name", "A", 0.9)]),
            source(),
            Utc::now(),
        )
        .unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn debug_output_hides_field_values() {
        let field = ExtractedField::new("P<UTOROE<<JANE", 0.9);
        let debug = format!("{field:?}");
        assert!(!debug.contains("ROE"));
        assert!(debug.contains("14 chars"));
    }
}
