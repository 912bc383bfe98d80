use std::collections::BTreeMap;

use crate::models::ExtractedField;

/// Clamp a service-reported confidence into [0, 1]. NaN becomes 0.
pub fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Mean confidence across the required fields.
/// A required field that was not extracted counts as 0.
pub fn required_field_confidence(
    fields: &BTreeMap<String, ExtractedField>,
    required: &[String],
) -> f32 {
    if required.is_empty() {
        return 0.0;
    }

    let total: f32 = required
        .iter()
        .map(|name| fields.get(name).map(|f| f.confidence).unwrap_or(0.0))
        .sum();

    total / required.len() as f32
}

/// Required fields absent from the extraction, in configured order.
pub fn missing_required_fields<'a>(
    fields: &BTreeMap<String, ExtractedField>,
    required: &'a [String],
) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| !fields.contains_key(name.as_str()))
        .map(String::as_str)
        .collect()
}

/// Fields read below `threshold`, in key order.
pub fn low_confidence_fields(
    fields: &BTreeMap<String, ExtractedField>,
    threshold: f32,
) -> Vec<(&str, f32)> {
    fields
        .iter()
        .filter(|(_, f)| f.confidence < threshold)
        .map(|(name, f)| (name.as_str(), f.confidence))
        .collect()
}

/// Mean page-level confidence, or 0 when the service reported none.
pub fn mean_page_confidence(page_confidences: &[f32]) -> f32 {
    if page_confidences.is_empty() {
        return 0.0;
    }
    let sum: f32 = page_confidences.iter().map(|c| clamp_confidence(*c)).sum();
    sum / page_confidences.len() as f32
}
