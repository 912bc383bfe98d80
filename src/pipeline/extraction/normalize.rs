//! Maps service-specific entity names onto the canonical record keys.
//!
//! Identity processors report entities as "Family Name", "given-names",
//! "DocumentId" and so on. Everything is folded to snake_case first, then
//! looked up in the alias table; unknown types are kept as-is so nothing
//! the service found is silently dropped.

use std::collections::BTreeMap;

use super::confidence::{clamp_confidence, mean_page_confidence};
use super::types::{RawEntity, RawExtraction};
use crate::models::ExtractedField;

/// Alias → canonical key.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("name", "full_name"),
    ("full_name", "full_name"),
    ("holder_name", "full_name"),
    ("given_names", "given_names"),
    ("given_name", "given_names"),
    ("first_name", "given_names"),
    ("forenames", "given_names"),
    ("family_name", "family_name"),
    ("surname", "family_name"),
    ("last_name", "family_name"),
    ("document_number", "document_number"),
    ("document_id", "document_number"),
    ("document_no", "document_number"),
    ("passport_number", "document_number"),
    ("passport_no", "document_number"),
    ("license_number", "document_number"),
    ("licence_number", "document_number"),
    ("dl_number", "document_number"),
    ("id_number", "document_number"),
    ("card_number", "document_number"),
    ("expiry_date", "expiry_date"),
    ("expiration_date", "expiry_date"),
    ("date_of_expiry", "expiry_date"),
    ("expires", "expiry_date"),
    ("valid_until", "expiry_date"),
    ("date_of_birth", "date_of_birth"),
    ("dob", "date_of_birth"),
    ("birth_date", "date_of_birth"),
    ("issue_date", "issue_date"),
    ("date_of_issue", "issue_date"),
    ("issued", "issue_date"),
    ("nationality", "nationality"),
    ("citizenship", "nationality"),
    ("sex", "sex"),
    ("gender", "sex"),
    ("address", "address"),
    ("place_of_birth", "place_of_birth"),
    ("birth_place", "place_of_birth"),
    ("issuing_authority", "issuing_authority"),
    ("authority", "issuing_authority"),
    ("issuer", "issuing_authority"),
    ("mrz", "mrz"),
    ("mrz_code", "mrz"),
    ("machine_readable_zone", "mrz"),
];

/// Longest key accepted from a `Key: Value` text line. Longer prefixes are
/// sentences that happen to contain a colon.
const MAX_TEXT_KEY_LEN: usize = 40;

/// Fold an entity type to snake_case: "Given Names", "given-names" and
/// "GivenNames" all become `given_names`.
pub fn to_snake_case(kind: &str) -> String {
    let mut out = String::with_capacity(kind.len() + 4);
    let mut prev_lower = false;

    for c in kind.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = c.is_lowercase() || c.is_numeric();
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        }
    }

    out.trim_end_matches('_').to_string()
}

/// Canonical record key for a service entity type.
pub fn canonical_field_name(kind: &str) -> String {
    let key = to_snake_case(kind);
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(key)
}

/// Normalize a raw service result into record fields.
///
/// Entities are preferred. When the service found none, `Key: Value`
/// lines of the OCR text are used instead, each at the mean page
/// confidence.
pub fn normalize_extraction(raw: &RawExtraction) -> BTreeMap<String, ExtractedField> {
    let mut fields = normalize_entities(&raw.entities);

    if fields.is_empty() && !raw.text.trim().is_empty() {
        let confidence = mean_page_confidence(&raw.page_confidences);
        fields = parse_key_value_lines(&raw.text, confidence);
    }

    synthesize_full_name(&mut fields);
    fields
}

/// Fold entities into canonical fields. On duplicate keys the
/// highest-confidence value wins.
pub fn normalize_entities(entities: &[RawEntity]) -> BTreeMap<String, ExtractedField> {
    let mut fields: BTreeMap<String, ExtractedField> = BTreeMap::new();

    for entity in entities {
        let name = canonical_field_name(&entity.kind);
        let value = entity.value.trim();
        if name.is_empty() || value.is_empty() {
            continue;
        }
        let confidence = clamp_confidence(entity.confidence);

        let replace = fields
            .get(&name)
            .map_or(true, |existing| confidence > existing.confidence);
        if replace {
            fields.insert(name, ExtractedField::new(value, confidence));
        }
    }

    fields
}

/// Read `Key: Value` lines from OCR text. First occurrence of a key wins.
pub fn parse_key_value_lines(text: &str, confidence: f32) -> BTreeMap<String, ExtractedField> {
    let confidence = clamp_confidence(confidence);
    let mut fields = BTreeMap::new();

    for line in text.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty()
            || key.len() > MAX_TEXT_KEY_LEN
            || value.is_empty()
            || !key.chars().any(char::is_alphabetic)
        {
            continue;
        }

        let name = canonical_field_name(key);
        if name.is_empty() {
            continue;
        }
        fields
            .entry(name)
            .or_insert_with(|| ExtractedField::new(value, confidence));
    }

    fields
}

/// Build `full_name` from given + family names when the service reported
/// them separately. Its confidence is the weaker of the two.
fn synthesize_full_name(fields: &mut BTreeMap<String, ExtractedField>) {
    if fields.contains_key("full_name") {
        return;
    }
    let (Some(given), Some(family)) = (fields.get("given_names"), fields.get("family_name"))
    else {
        return;
    };

    let full = ExtractedField::new(
        format!("{} {}", given.value, family.value),
        given.confidence.min(family.confidence),
    );
    fields.insert("full_name".to_string(), full);
}
