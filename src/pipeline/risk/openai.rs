use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::types::{CompletionRequest, LlmClient};
use super::EvaluationError;
use crate::config::LlmSettings;

/// Sampling temperature for risk scoring. Low, so repeated runs on the
/// same record score alike.
const RISK_TEMPERATURE: f32 = 0.1;

// ──────────────────────────────────────────────
// OpenAiClient
// ──────────────────────────────────────────────

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    base_url: String,
    api_key: Zeroizing<String>,
    model: String,
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, EvaluationError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| EvaluationError::ServiceUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: Zeroizing::new(settings.api_key.clone()),
            model: settings.model.clone(),
            client,
        })
    }
}

/// Request body for /chat/completions
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Response body from /chat/completions
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl LlmClient for OpenAiClient {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        timeout: Duration,
    ) -> Result<String, EvaluationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: RISK_TEMPERATURE,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.as_str())
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    EvaluationError::ServiceUnavailable(format!(
                        "request timed out after {}s",
                        timeout.as_secs_f32()
                    ))
                } else if e.is_connect() {
                    EvaluationError::ServiceUnavailable(format!("cannot reach {}", self.base_url))
                } else {
                    EvaluationError::ServiceUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Language model service returned error");
            return Err(EvaluationError::ServiceUnavailable(format!(
                "language model service returned status {}",
                status.as_u16()
            )));
        }

        let parsed: ChatResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                EvaluationError::ServiceUnavailable("response body timed out".into())
            } else {
                EvaluationError::MalformedResponse(format!("unreadable completion body: {e}"))
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EvaluationError::MalformedResponse("completion has no content".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ──────────────────────────────────────────────
// MockLlmClient (testing)
// ──────────────────────────────────────────────

/// One call as the mock saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub system: String,
    pub prompt: String,
    pub json_mode: bool,
    pub timeout: Duration,
}

/// Mock language model replaying a script of answers. The last entry
/// repeats once the script runs out.
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, EvaluationError>>>,
    last: Mutex<Option<Result<String, EvaluationError>>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl MockLlmClient {
    pub fn scripted(script: Vec<Result<String, EvaluationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `response`.
    pub fn answering(response: &str) -> Self {
        Self::scripted(vec![Ok(response.to_string())])
    }

    /// Answer with JSON carrying the given percentages.
    pub fn with_scores(fraud_percent: u32, aml_percent: u32) -> Self {
        Self::answering(&format!(
            r#"{{"fraud_risk": {fraud_percent}, "aml_risk": {aml_percent}, "confidence": 0.9, "flags": [], "analysis": "mock assessment"}}"#
        ))
    }

    /// Every call fails as if the service were down.
    pub fn unreachable() -> Self {
        Self::scripted(vec![Err(EvaluationError::ServiceUnavailable(
            "connection refused".into(),
        ))])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl LlmClient for MockLlmClient {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        timeout: Duration,
    ) -> Result<String, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                system: request.system.to_string(),
                prompt: request.prompt.to_string(),
                json_mode: request.json_mode,
                timeout,
            });

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match next {
            Some(answer) => {
                *last = Some(answer.clone());
                answer
            }
            None => last.clone().unwrap_or_else(|| {
                Err(EvaluationError::ServiceUnavailable("mock script is empty".into()))
            }),
        }
    }

    fn model(&self) -> &str {
        "mock-llm"
    }
}
