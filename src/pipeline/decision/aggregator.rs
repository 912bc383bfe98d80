use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::DecisionThresholds;
use crate::models::{
    ContributingFactor, Decision, DocumentRecord, Outcome, RiskAssessment, RiskScore, ScoreBand,
};
use crate::pipeline::extraction::low_confidence_fields;
use crate::pipeline::risk::EvaluationError;

/// The extraction finished below the required-field confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LowConfidence {
    pub aggregate: f32,
    pub threshold: f32,
}

/// Everything one decision is made from.
#[derive(Debug, Clone, Copy)]
pub struct AggregationInput<'a> {
    pub record: &'a DocumentRecord,
    /// The assessment, or the evaluator's explicit failure.
    pub risk: Result<&'a RiskAssessment, &'a EvaluationError>,
    pub low_confidence: Option<LowConfidence>,
    /// Previous decision on the same record when re-evaluating.
    pub supersedes: Option<Uuid>,
}

/// Decision Aggregator. A total, deterministic function of its input.
#[derive(Debug, Clone, Copy)]
pub struct DecisionAggregator {
    thresholds: DecisionThresholds,
    /// Fields read below this are listed as contributing factors.
    field_threshold: f32,
}

impl DecisionAggregator {
    pub fn new(thresholds: DecisionThresholds, field_threshold: f32) -> Self {
        Self {
            thresholds,
            field_threshold,
        }
    }

    pub fn band(&self, score: RiskScore) -> ScoreBand {
        match score {
            RiskScore::Unknown => ScoreBand::Unknown,
            RiskScore::Known(v) if v >= self.thresholds.reject_at => ScoreBand::High,
            RiskScore::Known(v) if v >= self.thresholds.review_at => ScoreBand::Elevated,
            RiskScore::Known(_) => ScoreBand::Low,
        }
    }

    /// Decide, stamping the current time.
    pub fn aggregate(&self, input: &AggregationInput<'_>) -> Decision {
        self.aggregate_at(input, Utc::now())
    }

    /// Decide with an explicit timestamp. Same input and time, same decision.
    pub fn aggregate_at(&self, input: &AggregationInput<'_>, decided_at: DateTime<Utc>) -> Decision {
        let record = input.record;
        let _span = tracing::info_span!(
            "aggregate_decision",
            record_id = %record.id(),
            evaluator_failed = input.risk.is_err(),
            low_confidence = input.low_confidence.is_some(),
        )
        .entered();

        let mut factors = Vec::new();
        let mut outcome = Outcome::Accept;

        match input.risk {
            Ok(assessment) => {
                let fraud_band = self.band(assessment.fraud_risk);
                let aml_band = self.band(assessment.aml_risk);
                factors.push(ContributingFactor::FraudScore {
                    score: assessment.fraud_risk,
                    band: fraud_band,
                });
                factors.push(ContributingFactor::AmlScore {
                    score: assessment.aml_risk,
                    band: aml_band,
                });
                for (index, flag) in assessment.flags.iter().enumerate() {
                    factors.push(ContributingFactor::RiskFlag {
                        index,
                        code: flag.code.clone(),
                    });
                }

                let bands = [fraud_band, aml_band];
                if bands.contains(&ScoreBand::High) {
                    outcome = Outcome::Reject;
                } else if bands.contains(&ScoreBand::Elevated) || bands.contains(&ScoreBand::Unknown)
                {
                    // An unknown score cannot support an accept
                    outcome = Outcome::Review;
                }
            }
            Err(_) => outcome = Outcome::Review,
        }

        if let Some(low) = input.low_confidence {
            factors.push(ContributingFactor::LowConfidenceExtraction {
                aggregate: low.aggregate,
                threshold: low.threshold,
            });
            if outcome == Outcome::Accept {
                outcome = Outcome::Review;
            }
        }

        for (field, confidence) in low_confidence_fields(record.fields(), self.field_threshold) {
            factors.push(ContributingFactor::FieldConfidence {
                field: field.to_string(),
                confidence,
            });
        }

        if let Err(e) = input.risk {
            factors.push(ContributingFactor::EvaluatorFailure {
                reason: e.to_string(),
            });
        }

        let decision = Decision::new(record.id(), outcome, factors, input.supersedes, decided_at);
        tracing::info!(
            decision_id = %decision.id(),
            outcome = %decision.outcome(),
            factors = decision.factors().len(),
            supersedes = ?decision.supersedes(),
            "Decision made"
        );
        decision
    }
}

impl Default for DecisionAggregator {
    fn default() -> Self {
        Self::new(DecisionThresholds::default(), 0.6)
    }
}
