use std::sync::Arc;
use std::time::Duration;

use super::EvaluationError;
use crate::models::{DocumentRecord, RiskAssessment};

/// One chat completion: a system instruction and a user prompt.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    /// Ask the service for JSON output mode (used on the strict retry).
    pub json_mode: bool,
}

/// Language model abstraction (allows mocking for tests)
pub trait LlmClient {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        timeout: Duration,
    ) -> Result<String, EvaluationError>;

    /// Model identifier recorded on each assessment.
    fn model(&self) -> &str;
}

impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        timeout: Duration,
    ) -> Result<String, EvaluationError> {
        (**self).complete(request, timeout)
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}

/// Risk Evaluator contract: a valid record in, an assessment or a typed
/// failure out. Never a fabricated score.
pub trait RiskEvaluator {
    fn evaluate(
        &self,
        record: &DocumentRecord,
        timeout: Duration,
    ) -> Result<RiskAssessment, EvaluationError>;
}
