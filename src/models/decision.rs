use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::Outcome;
use super::risk::RiskScore;

/// Namespace for content-derived decision ids.
const DECISION_NAMESPACE: Uuid = Uuid::from_u128(0x6b79_635f_7269_736b_5f64_6563_6973_696f);

/// Where a score fell relative to the decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Low,
    Elevated,
    High,
    Unknown,
}

/// Why a decision came out the way it did. Flags and fields are referenced
/// by index/name into the assessment and record they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContributingFactor {
    FraudScore { score: RiskScore, band: ScoreBand },
    AmlScore { score: RiskScore, band: ScoreBand },
    RiskFlag { index: usize, code: String },
    LowConfidenceExtraction { aggregate: f32, threshold: f32 },
    FieldConfidence { field: String, confidence: f32 },
    EvaluatorFailure { reason: String },
}

/// Terminal artifact of a pipeline run. Immutable; a re-evaluation
/// produces a new decision that names the one it supersedes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    id: Uuid,
    document_id: Uuid,
    outcome: Outcome,
    factors: Vec<ContributingFactor>,
    supersedes: Option<Uuid>,
    decided_at: DateTime<Utc>,
}

impl Decision {
    /// The id is derived from everything except the timestamp, so the same
    /// inputs always yield the same id.
    pub(crate) fn new(
        document_id: Uuid,
        outcome: Outcome,
        factors: Vec<ContributingFactor>,
        supersedes: Option<Uuid>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        let material =
            serde_json::to_vec(&(document_id, outcome, &factors, supersedes)).unwrap_or_default();
        Self {
            id: Uuid::new_v5(&DECISION_NAMESPACE, &material),
            document_id,
            outcome,
            factors,
            supersedes,
            decided_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn factors(&self) -> &[ContributingFactor] {
        &self.factors
    }

    pub fn supersedes(&self) -> Option<Uuid> {
        self.supersedes
    }

    pub fn decided_at(&self) -> DateTime<Utc> {
        self.decided_at
    }

    pub fn has_factor(&self, predicate: impl Fn(&ContributingFactor) -> bool) -> bool {
        self.factors.iter().any(predicate)
    }
}
