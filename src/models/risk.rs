use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A risk score in [0, 1], or `Unknown` when the model declined to give one.
/// Always present: serializes as a number or the string `"unknown"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskScore {
    Known(f32),
    Unknown,
}

impl RiskScore {
    /// Score from a unit value. `None` if outside [0, 1] or NaN.
    pub fn from_unit(value: f32) -> Option<Self> {
        (0.0..=1.0).contains(&value).then_some(Self::Known(value))
    }

    /// Score from a percentage (the model reports 0-100).
    pub fn from_percent(percent: f32) -> Option<Self> {
        if (0.0..=100.0).contains(&percent) {
            Some(Self::Known(percent / 100.0))
        } else {
            None
        }
    }

    pub fn value(&self) -> Option<f32> {
        match self {
            Self::Known(v) => Some(*v),
            Self::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl Serialize for RiskScore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(v) => serializer.serialize_f32(*v),
            Self::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

impl<'de> Deserialize<'de> for RiskScore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f32),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Self::from_unit(v)
                .ok_or_else(|| serde::de::Error::custom(format!("score {v} outside [0, 1]"))),
            Repr::Text(s) if s.eq_ignore_ascii_case("unknown") => Ok(Self::Unknown),
            Repr::Text(s) => Err(serde::de::Error::custom(format!("invalid score '{s}'"))),
        }
    }
}

/// One reason the model flagged, e.g. `EXPIRED_DOCUMENT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub code: String,
    pub rationale: String,
}

/// Output of the language-model risk stage for one document record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub fraud_risk: RiskScore,
    pub aml_risk: RiskScore,
    /// Ordered as the model reported them.
    pub flags: Vec<RiskFlag>,
    pub model_confidence: Option<f32>,
    /// Free-text summary shown to the reviewing analyst.
    pub analysis: Option<String>,
    pub model: String,
    /// Calls it took to obtain a parseable answer.
    pub attempts: u32,
}
