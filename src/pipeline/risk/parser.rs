use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::EvaluationError;
use crate::models::{RiskFlag, RiskScore};

/// Labelled-line fallback: "**Fraud Risk:** 45%".
static FRAUD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)fraud[\s_-]*risk[^0-9\n]{0,24}?(\d{1,3}(?:\.\d+)?)\s*%").unwrap()
});
static AML_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\baml[\s_-]*risk[^0-9\n]{0,24}?(\d{1,3}(?:\.\d+)?)\s*%").unwrap()
});
static ANALYSIS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\banalysis\b[*:\s]*(.+)$").unwrap());

/// Assessment content read from one model answer. Model name and attempt
/// count are added by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRisk {
    pub fraud_risk: RiskScore,
    pub aml_risk: RiskScore,
    pub flags: Vec<RiskFlag>,
    pub model_confidence: Option<f32>,
    pub analysis: Option<String>,
}

/// Parse a model answer. JSON (fenced or bare) is tried first, then the
/// labelled-line format. Scores are whole percentages.
pub fn parse_risk_response(response: &str) -> Result<ParsedRisk, EvaluationError> {
    if response.trim().is_empty() {
        return Err(EvaluationError::MalformedResponse("empty response".into()));
    }

    let json_problem = match extract_json_object(response) {
        Some(json) => match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) if has_score_key(&map) => return parse_json_object(&map),
            Ok(Value::Object(_)) => "answer has neither fraud_risk nor aml_risk".to_string(),
            Ok(_) => "JSON answer is not an object".to_string(),
            Err(e) => format!("invalid JSON: {e}"),
        },
        None => "no JSON object or risk lines found".to_string(),
    };

    // A stray or broken brace span may sit next to readable labelled lines
    parse_labelled_lines(response)
        .unwrap_or_else(|| Err(EvaluationError::MalformedResponse(json_problem)))
}

fn has_score_key(map: &serde_json::Map<String, Value>) -> bool {
    map.contains_key("fraud_risk") || map.contains_key("aml_risk")
}

/// Locate the JSON object: a ```json fence, a bare ``` fence, or the span
/// from the first '{' to the last '}'.
fn extract_json_object(response: &str) -> Option<&str> {
    for fence in ["```json", "```JSON", "```"] {
        if let Some(start) = response.find(fence) {
            let body_start = start + fence.len();
            if let Some(len) = response[body_start..].find("```") {
                let body = response[body_start..body_start + len].trim();
                if body.starts_with('{') {
                    return Some(body);
                }
            }
        }
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

/// How a score key was answered.
enum ScoreField {
    Missing,
    Read(RiskScore),
}

fn parse_json_object(map: &serde_json::Map<String, Value>) -> Result<ParsedRisk, EvaluationError> {
    let fraud = read_score(map, "fraud_risk")?;
    let aml = read_score(map, "aml_risk")?;

    let (fraud_risk, aml_risk) = match (fraud, aml) {
        (ScoreField::Missing, ScoreField::Missing) => {
            return Err(EvaluationError::MalformedResponse(
                "answer has neither fraud_risk nor aml_risk".into(),
            ));
        }
        (f, a) => (f.into_score(), a.into_score()),
    };

    let flags = match map.get("flags") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_flag).collect(),
        _ => Vec::new(),
    };

    let model_confidence = map
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
        .filter(|c| (0.0..=1.0).contains(c));

    let analysis = map
        .get("analysis")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ParsedRisk {
        fraud_risk,
        aml_risk,
        flags,
        model_confidence,
        analysis,
    })
}

impl ScoreField {
    fn into_score(self) -> RiskScore {
        match self {
            Self::Missing => RiskScore::Unknown,
            Self::Read(score) => score,
        }
    }
}

fn read_score(
    map: &serde_json::Map<String, Value>,
    key: &'static str,
) -> Result<ScoreField, EvaluationError> {
    let Some(value) = map.get(key) else {
        return Ok(ScoreField::Missing);
    };

    // Whole numbers only: a fractional value is most likely a 0-1 scale
    // answer, and reading 0.9 as 0.9% would invert its meaning.
    let percent = match value {
        Value::Null => return Ok(ScoreField::Read(RiskScore::Unknown)),
        Value::Number(n) if n.is_u64() || n.is_i64() => n.as_f64().map(|v| v as f32),
        Value::Number(_) => {
            return Err(EvaluationError::MalformedResponse(format!(
                "{key} is not a whole percentage"
            )));
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("unknown") || s.eq_ignore_ascii_case("n/a") {
                return Ok(ScoreField::Read(RiskScore::Unknown));
            }
            match s.strip_suffix('%') {
                // An explicit percent sign settles the scale
                Some(number) => number.trim().parse::<f32>().ok(),
                None => s.parse::<u32>().ok().map(|v| v as f32),
            }
        }
        _ => None,
    };

    percent
        .and_then(RiskScore::from_percent)
        .map(ScoreField::Read)
        .ok_or_else(|| {
            EvaluationError::MalformedResponse(format!("{key} is not a percentage in 0-100"))
        })
}

/// A flag is `{"code", "rationale"}` or a bare code string.
fn parse_flag(value: &Value) -> Option<RiskFlag> {
    let (code, rationale) = match value {
        Value::String(code) => (code.as_str(), ""),
        Value::Object(obj) => (
            obj.get("code").and_then(Value::as_str)?,
            obj.get("rationale")
                .or_else(|| obj.get("reason"))
                .and_then(Value::as_str)
                .unwrap_or(""),
        ),
        _ => return None,
    };

    let code = normalize_flag_code(code);
    if code.is_empty() {
        return None;
    }
    Some(RiskFlag {
        code,
        rationale: rationale.trim().to_string(),
    })
}

/// "expired document" / "Expired-Document" → `EXPIRED_DOCUMENT`.
pub fn normalize_flag_code(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for c in code.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Read the labelled-line format. `None` when neither score is present.
fn parse_labelled_lines(response: &str) -> Option<Result<ParsedRisk, EvaluationError>> {
    let fraud = FRAUD_LINE.captures(response).map(|c| c[1].to_string());
    let aml = AML_LINE.captures(response).map(|c| c[1].to_string());
    if fraud.is_none() && aml.is_none() {
        return None;
    }

    let to_score = |raw: Option<String>, key: &str| -> Result<RiskScore, EvaluationError> {
        match raw {
            None => Ok(RiskScore::Unknown),
            Some(raw) => raw
                .parse::<f32>()
                .ok()
                .and_then(RiskScore::from_percent)
                .ok_or_else(|| {
                    EvaluationError::MalformedResponse(format!("{key} {raw}% is outside 0-100"))
                }),
        }
    };

    let fraud_risk = match to_score(fraud, "fraud risk") {
        Ok(s) => s,
        Err(e) => return Some(Err(e)),
    };
    let aml_risk = match to_score(aml, "AML risk") {
        Ok(s) => s,
        Err(e) => return Some(Err(e)),
    };

    let analysis = ANALYSIS_LINE
        .captures(response)
        .map(|c| c[1].trim().trim_start_matches('*').trim().to_string())
        .filter(|s| !s.is_empty());

    Some(Ok(ParsedRisk {
        fraud_risk,
        aml_risk,
        flags: Vec::new(),
        model_confidence: None,
        analysis,
    }))
}
