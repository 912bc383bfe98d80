//! KYC pipeline entry point.
//!
//! Drives one document through the three stages in order:
//! extract → evaluate risk → aggregate. Every call ends in exactly one
//! `Decision` or one typed `PipelineError`.
//!
//! Both external services sit behind traits, so the pipeline is fully
//! testable with mock implementations. A pipeline holds no mutable state;
//! one instance can serve any number of parallel runs.

use serde::Serialize;
use uuid::Uuid;

use crate::config::{PipelineConfig, TimeoutConfig};
use crate::models::{Decision, DocumentRecord, DocumentType, RiskAssessment};
use crate::pipeline::decision::{AggregationInput, DecisionAggregator, LowConfidence};
use crate::pipeline::extraction::{
    required_field_confidence, DocumentExtractor, DocumentService, ExtractionAdapter,
    ExtractionError,
};
use crate::pipeline::risk::{EvaluationError, LlmClient, LlmRiskEvaluator, RiskEvaluator};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Fatal outcomes of a run. Recoverable extraction and every evaluator
/// failure end in a decision instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Decision {decision_id} belongs to document {expected}, not {actual}")]
    RecordMismatch {
        decision_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Extraction(e) => e.code(),
            Self::RecordMismatch { .. } => "RECORD_MISMATCH",
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A stage failure as shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub code: &'static str,
    pub message: String,
}

impl From<&EvaluationError> for StageFailure {
    fn from(e: &EvaluationError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Everything one run produced, for display next to the decision.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub record: DocumentRecord,
    /// Mean confidence over the required fields.
    pub required_field_confidence: f32,
    pub low_confidence: Option<LowConfidence>,
    pub assessment: Option<RiskAssessment>,
    pub evaluation_failure: Option<StageFailure>,
    pub decision: Decision,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct KycPipeline {
    extractor: Box<dyn DocumentExtractor + Send + Sync>,
    evaluator: Box<dyn RiskEvaluator + Send + Sync>,
    aggregator: DecisionAggregator,
    config: PipelineConfig,
}

impl KycPipeline {
    pub fn new(
        extractor: Box<dyn DocumentExtractor + Send + Sync>,
        evaluator: Box<dyn RiskEvaluator + Send + Sync>,
        config: PipelineConfig,
    ) -> Self {
        let aggregator =
            DecisionAggregator::new(config.decision, config.extraction.min_required_confidence);
        Self {
            extractor,
            evaluator,
            aggregator,
            config,
        }
    }

    /// Wire the standard adapters around the two service clients.
    pub fn from_services(
        document_service: Box<dyn DocumentService + Send + Sync>,
        llm: Box<dyn LlmClient + Send + Sync>,
        config: PipelineConfig,
    ) -> Self {
        let extractor = ExtractionAdapter::new(document_service, config.extraction.clone());
        let evaluator = LlmRiskEvaluator::new(
            llm,
            config.evaluation.clone(),
            config.extraction.min_required_confidence,
        );
        Self::new(Box::new(extractor), Box::new(evaluator), config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one document through the pipeline and return its decision.
    pub fn evaluate(
        &self,
        bytes: &[u8],
        type_hint: DocumentType,
        timeouts: TimeoutConfig,
    ) -> Result<Decision, PipelineError> {
        self.process(bytes, type_hint, timeouts)
            .map(|report| report.decision)
    }

    /// Same as `evaluate`, keeping the intermediate artifacts.
    pub fn process(
        &self,
        bytes: &[u8],
        type_hint: DocumentType,
        timeouts: TimeoutConfig,
    ) -> Result<EvaluationReport, PipelineError> {
        let _span = tracing::info_span!(
            "kyc_pipeline",
            document_type = %type_hint,
            size = bytes.len(),
        )
        .entered();

        let (record, low_confidence) =
            match self.extractor.extract(bytes, type_hint, timeouts.extraction) {
                Ok(record) => (record, None),
                Err(ExtractionError::LowConfidenceExtraction {
                    record,
                    aggregate,
                    threshold,
                }) => (
                    *record,
                    Some(LowConfidence {
                        aggregate,
                        threshold,
                    }),
                ),
                Err(e) => {
                    tracing::warn!(error_code = e.code(), error = %e, "Pipeline stopped at extraction");
                    return Err(e.into());
                }
            };

        Ok(self.assess(record, low_confidence, None, timeouts))
    }

    /// Re-run risk evaluation and aggregation on an existing record.
    /// The new decision supersedes `previous`, which is left untouched.
    pub fn reevaluate(
        &self,
        record: &DocumentRecord,
        previous: &Decision,
        timeouts: TimeoutConfig,
    ) -> Result<EvaluationReport, PipelineError> {
        if previous.document_id() != record.id() {
            return Err(PipelineError::RecordMismatch {
                decision_id: previous.id(),
                expected: previous.document_id(),
                actual: record.id(),
            });
        }

        let _span = tracing::info_span!(
            "kyc_pipeline",
            record_id = %record.id(),
            supersedes = %previous.id(),
        )
        .entered();

        let aggregate =
            required_field_confidence(record.fields(), &self.config.extraction.required_fields);
        let threshold = self.config.extraction.min_required_confidence;
        let low_confidence = (aggregate < threshold).then_some(LowConfidence {
            aggregate,
            threshold,
        });

        Ok(self.assess(record.clone(), low_confidence, Some(previous.id()), timeouts))
    }

    /// Stages 2 and 3. Never fails: an evaluator error becomes a review.
    fn assess(
        &self,
        record: DocumentRecord,
        low_confidence: Option<LowConfidence>,
        supersedes: Option<Uuid>,
        timeouts: TimeoutConfig,
    ) -> EvaluationReport {
        let risk = self.evaluator.evaluate(&record, timeouts.evaluation);

        let decision = self.aggregator.aggregate(&AggregationInput {
            record: &record,
            risk: risk.as_ref(),
            low_confidence,
            supersedes,
        });

        let (assessment, evaluation_failure) = match risk {
            Ok(assessment) => (Some(assessment), None),
            Err(e) => (None, Some(StageFailure::from(&e))),
        };

        EvaluationReport {
            required_field_confidence: required_field_confidence(
                record.fields(),
                &self.config.extraction.required_fields,
            ),
            record,
            low_confidence,
            assessment,
            evaluation_failure,
            decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::models::{ContributingFactor, Outcome, RiskScore};
    use crate::pipeline::extraction::MockDocumentService;
    use crate::pipeline::risk::MockLlmClient;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    fn passport(conf: f32) -> Arc<MockDocumentService> {
        Arc::new(MockDocumentService::with_entities(&[
            ("Given Names", "JANE", conf),
            ("Family Name", "ROE", conf),
            ("Passport Number", "X1234567", conf),
            ("Date of Expiry", "2031-04-09", conf),
            ("Nationality", "UTO", conf),
        ]))
    }

    fn pipeline(ocr: Arc<MockDocumentService>, llm: Arc<MockLlmClient>) -> KycPipeline {
        KycPipeline::from_services(Box::new(ocr), Box::new(llm), PipelineConfig::default())
    }

    fn timeouts() -> TimeoutConfig {
        TimeoutConfig {
            extraction: Duration::from_secs(5),
            evaluation: Duration::from_secs(5),
        }
    }

    #[test]
    fn clean_passport_is_accepted() {
        let llm = Arc::new(MockLlmClient::with_scores(10, 10));
        let decision = pipeline(passport(0.95), llm.clone())
            .evaluate(PNG, DocumentType::Passport, timeouts())
            .unwrap();

        assert_eq!(decision.outcome(), Outcome::Accept);
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn high_fraud_is_rejected() {
        let llm = Arc::new(MockLlmClient::with_scores(85, 5));
        let decision = pipeline(passport(0.95), llm)
            .evaluate(PNG, DocumentType::Passport, timeouts())
            .unwrap();
        assert_eq!(decision.outcome(), Outcome::Reject);
    }

    #[test]
    fn unit_scale_answer_is_never_accepted() {
        let llm = Arc::new(MockLlmClient::answering(
            r#"{"fraud_risk": 0.9, "aml_risk": 0.85}"#,
        ));
        let report = pipeline(passport(0.95), llm.clone())
            .process(PNG, DocumentType::Passport, timeouts())
            .unwrap();

        assert_eq!(report.decision.outcome(), Outcome::Review);
        assert!(report.assessment.is_none());
        assert_eq!(
            report.evaluation_failure.as_ref().map(|f| f.code),
            Some("MALFORMED_RESPONSE")
        );
        assert_eq!(llm.call_count(), 2);
    }

    #[test]
    fn unit_scale_answer_corrected_on_strict_retry() {
        let llm = Arc::new(MockLlmClient::scripted(vec![
            Ok(r#"{"fraud_risk": 0.9, "aml_risk": 0.05}"#.into()),
            Ok(r#"{"fraud_risk": 90, "aml_risk": 5}"#.into()),
        ]));
        let decision = pipeline(passport(0.95), llm.clone())
            .evaluate(PNG, DocumentType::Passport, timeouts())
            .unwrap();

        assert_eq!(decision.outcome(), Outcome::Reject);
        assert!(llm.recorded_calls()[1].json_mode);
    }

    #[test]
    fn stage_timeouts_reach_their_adapters() {
        let ocr = passport(0.95);
        let llm = Arc::new(MockLlmClient::with_scores(10, 10));
        let pipeline = pipeline(ocr.clone(), llm.clone());

        let first = pipeline
            .process(
                PNG,
                DocumentType::Passport,
                TimeoutConfig {
                    extraction: Duration::from_secs(7),
                    evaluation: Duration::from_secs(11),
                },
            )
            .unwrap();
        assert_eq!(ocr.last_timeout(), Some(Duration::from_secs(7)));
        assert_eq!(llm.recorded_calls()[0].timeout, Duration::from_secs(11));

        pipeline
            .reevaluate(
                &first.record,
                &first.decision,
                TimeoutConfig {
                    extraction: Duration::from_secs(3),
                    evaluation: Duration::from_secs(13),
                },
            )
            .unwrap();
        // Re-evaluation never calls the document service
        assert_eq!(ocr.call_count(), 1);
        assert_eq!(llm.recorded_calls()[1].timeout, Duration::from_secs(13));
    }

    #[test]
    fn evaluator_retry_keeps_the_stage_timeout() {
        let llm = Arc::new(MockLlmClient::unreachable());
        pipeline(passport(0.95), llm.clone())
            .process(
                PNG,
                DocumentType::Passport,
                TimeoutConfig {
                    extraction: Duration::from_secs(2),
                    evaluation: Duration::from_secs(9),
                },
            )
            .unwrap();

        let calls = llm.recorded_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.timeout == Duration::from_secs(9)));
    }

    #[test]
    fn low_confidence_extraction_reviews_with_zero_risk() {
        let llm = Arc::new(MockLlmClient::with_scores(0, 0));
        let report = pipeline(passport(0.5), llm.clone())
            .process(PNG, DocumentType::Passport, timeouts())
            .unwrap();

        assert_eq!(report.decision.outcome(), Outcome::Review);
        assert!(report.low_confidence.is_some());
        assert!((report.required_field_confidence - 0.5).abs() < 1e-6);
        // The evaluator still ran on the recovered record
        assert_eq!(llm.call_count(), 1);
        assert_eq!(
            report.assessment.as_ref().map(|a| a.fraud_risk),
            Some(RiskScore::Known(0.0))
        );
    }

    #[test]
    fn unreachable_llm_reviews_with_failure_factor() {
        let llm = Arc::new(MockLlmClient::unreachable());
        let report = pipeline(passport(0.95), llm.clone())
            .process(PNG, DocumentType::Passport, timeouts())
            .unwrap();

        assert_eq!(llm.call_count(), 2);
        assert_eq!(report.decision.outcome(), Outcome::Review);
        assert!(report
            .decision
            .has_factor(|f| matches!(f, ContributingFactor::EvaluatorFailure { .. })));
        assert!(report.assessment.is_none());
        assert_eq!(
            report.evaluation_failure.as_ref().map(|f| f.code),
            Some("EVALUATION_UNAVAILABLE")
        );
    }

    #[test]
    fn unsupported_format_is_fatal() {
        let ocr = passport(0.95);
        let llm = Arc::new(MockLlmClient::with_scores(0, 0));
        let err = pipeline(ocr.clone(), llm.clone())
            .evaluate(b"plain text is not an identity document", DocumentType::Passport, timeouts())
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Extraction(ExtractionError::UnsupportedFormat(_))
        ));
        assert_eq!(err.code(), "UNSUPPORTED_FORMAT");
        assert_eq!(ocr.call_count(), 0);
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn extraction_service_down_is_fatal_without_retry() {
        let ocr = Arc::new(MockDocumentService::failing(
            ExtractionError::ServiceUnavailable("timed out".into()),
        ));
        let llm = Arc::new(MockLlmClient::with_scores(0, 0));
        let err = pipeline(ocr.clone(), llm.clone())
            .evaluate(PNG, DocumentType::Passport, timeouts())
            .unwrap_err();

        assert_eq!(err.code(), "EXTRACTION_UNAVAILABLE");
        assert_eq!(ocr.call_count(), 1);
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn empty_extraction_never_reaches_evaluator() {
        let ocr = Arc::new(MockDocumentService::with_entities(&[]));
        let llm = Arc::new(MockLlmClient::with_scores(0, 0));
        let err = pipeline(ocr, llm.clone())
            .evaluate(PNG, DocumentType::NationalId, timeouts())
            .unwrap_err();
        assert_eq!(err.code(), "NO_FIELDS_EXTRACTED");
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn reevaluation_supersedes_previous_decision() {
        let llm = Arc::new(MockLlmClient::scripted(vec![
            Err(EvaluationError::ServiceUnavailable("down".into())),
            Err(EvaluationError::ServiceUnavailable("down".into())),
            Ok(r#"{"fraud_risk": 5, "aml_risk": 5}"#.into()),
        ]));
        let pipeline = pipeline(passport(0.95), llm);

        let first = pipeline
            .process(PNG, DocumentType::Passport, timeouts())
            .unwrap();
        assert_eq!(first.decision.outcome(), Outcome::Review);

        let second = pipeline
            .reevaluate(&first.record, &first.decision, timeouts())
            .unwrap();
        assert_eq!(second.decision.outcome(), Outcome::Accept);
        assert_eq!(second.decision.supersedes(), Some(first.decision.id()));
        assert_eq!(second.decision.document_id(), first.record.id());
        // The earlier decision is untouched
        assert_eq!(first.decision.outcome(), Outcome::Review);
    }

    #[test]
    fn reevaluation_keeps_low_confidence_signal() {
        let llm = Arc::new(MockLlmClient::with_scores(0, 0));
        let pipeline = pipeline(passport(0.5), llm);
        let first = pipeline
            .process(PNG, DocumentType::Passport, timeouts())
            .unwrap();
        let second = pipeline
            .reevaluate(&first.record, &first.decision, timeouts())
            .unwrap();
        assert_eq!(second.decision.outcome(), Outcome::Review);
        assert!(second.low_confidence.is_some());
    }

    #[test]
    fn reevaluation_rejects_foreign_decision() {
        let llm = Arc::new(MockLlmClient::with_scores(0, 0));
        let pipeline = pipeline(passport(0.95), llm);
        let a = pipeline.process(PNG, DocumentType::Passport, timeouts()).unwrap();
        let b = pipeline.process(PNG, DocumentType::Passport, timeouts()).unwrap();

        let err = pipeline
            .reevaluate(&a.record, &b.decision, timeouts())
            .unwrap_err();
        assert!(matches!(err, PipelineError::RecordMismatch { .. }));
    }

    #[test]
    fn parallel_runs_are_independent() {
        let llm = Arc::new(MockLlmClient::with_scores(10, 10));
        let ocr = passport(0.95);
        let pipeline = Arc::new(pipeline(ocr.clone(), llm.clone()));

        let decisions: Vec<Decision> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let pipeline = Arc::clone(&pipeline);
                    s.spawn(move || {
                        pipeline
                            .evaluate(PNG, DocumentType::Passport, timeouts())
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(decisions.len(), 8);
        assert!(decisions.iter().all(|d| d.outcome() == Outcome::Accept));
        // Each run extracted its own record
        let mut ids: Vec<Uuid> = decisions.iter().map(|d| d.document_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(ocr.call_count(), 8);
        assert_eq!(llm.call_count(), 8);
    }
}
