//! Shared types for the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::pipeline::KycPipeline;

/// Longest per-stage timeout a caller may request.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Room left in the request body limit for multipart framing and the
/// small text fields next to the file.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared state for all API routes. The pipeline is immutable, so every
/// request can use it concurrently.
#[derive(Clone)]
pub struct ApiContext {
    pub pipeline: Arc<KycPipeline>,
}

impl ApiContext {
    pub fn new(pipeline: Arc<KycPipeline>) -> Self {
        Self { pipeline }
    }

    /// Largest request body accepted on the upload route.
    pub fn body_limit(&self) -> usize {
        self.pipeline.config().extraction.max_document_bytes + MULTIPART_OVERHEAD_BYTES
    }

    /// Configured timeouts, or a caller override applied to both stages.
    pub fn timeouts(&self, override_secs: Option<u64>) -> Result<TimeoutConfig, String> {
        match override_secs {
            None => Ok(self.pipeline.config().timeouts),
            Some(0) => Err("timeout_secs must be positive".into()),
            Some(secs) if secs > MAX_REQUEST_TIMEOUT_SECS => Err(format!(
                "timeout_secs must be at most {MAX_REQUEST_TIMEOUT_SECS}"
            )),
            Some(secs) => Ok(TimeoutConfig {
                extraction: Duration::from_secs(secs),
                evaluation: Duration::from_secs(secs),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::extraction::MockDocumentService;
    use crate::pipeline::risk::MockLlmClient;

    fn ctx() -> ApiContext {
        ApiContext::new(Arc::new(KycPipeline::from_services(
            Box::new(MockDocumentService::with_entities(&[])),
            Box::new(MockLlmClient::with_scores(0, 0)),
            PipelineConfig::default(),
        )))
    }

    #[test]
    fn default_timeouts_come_from_config() {
        let t = ctx().timeouts(None).unwrap();
        assert_eq!(t, TimeoutConfig::default());
    }

    #[test]
    fn override_applies_to_both_stages() {
        let t = ctx().timeouts(Some(12)).unwrap();
        assert_eq!(t.extraction, Duration::from_secs(12));
        assert_eq!(t.evaluation, Duration::from_secs(12));
    }

    #[test]
    fn zero_and_huge_overrides_are_refused() {
        assert!(ctx().timeouts(Some(0)).is_err());
        assert!(ctx().timeouts(Some(MAX_REQUEST_TIMEOUT_SECS + 1)).is_err());
    }

    #[test]
    fn body_limit_leaves_room_for_framing() {
        assert_eq!(
            ctx().body_limit(),
            20 * 1024 * 1024 + MULTIPART_OVERHEAD_BYTES
        );
    }
}
