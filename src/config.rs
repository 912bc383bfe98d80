use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::extraction::canonical_field_name;

/// Application-level constants
pub const APP_NAME: &str = "KYC Risk";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "warn,kyc_risk_lib=info,kyc_risk=info"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ──────────────────────────────────────────────
// Pipeline configuration
// ──────────────────────────────────────────────

/// Extraction Adapter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Aggregate confidence over required fields below which the
    /// extraction is flagged as low confidence.
    pub min_required_confidence: f32,
    /// Canonical field keys that every identity document must carry.
    pub required_fields: Vec<String>,
    /// Larger uploads are rejected as unsupported before any outbound call.
    pub max_document_bytes: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_required_confidence: 0.6,
            required_fields: vec![
                "full_name".to_string(),
                "document_number".to_string(),
                "expiry_date".to_string(),
            ],
            max_document_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Risk Evaluator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    /// Extra attempts after the first call, shared by the
    /// service-unavailable and malformed-response paths.
    pub max_retries: u32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

/// Decision Aggregator thresholds. Both comparisons are `>=`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionThresholds {
    pub reject_at: f32,
    pub review_at: f32,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            reject_at: 0.8,
            review_at: 0.4,
        }
    }
}

/// Per-call deadlines for the two external services.
/// An elapsed deadline is reported as service unavailable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutConfig {
    pub extraction: Duration,
    pub evaluation: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            extraction: Duration::from_secs(30),
            evaluation: Duration::from_secs(60),
        }
    }
}

/// Everything a pipeline run needs besides the service adapters.
/// Passed explicitly into constructors; nothing is read from globals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub evaluation: EvaluationConfig,
    pub decision: DecisionThresholds,
    pub timeouts: TimeoutConfig,
}

impl PipelineConfig {
    /// Defaults overridden by `KYC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable source (tests use a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<f32, _>(&lookup, "KYC_MIN_EXTRACTION_CONFIDENCE")? {
            config.extraction.min_required_confidence = v;
        }
        if let Some(raw) = lookup("KYC_REQUIRED_FIELDS") {
            // Same key mapping as extracted fields, so "Passport No" means document_number
            let mut fields: Vec<String> = Vec::new();
            for name in raw.split(',').map(canonical_field_name) {
                if !name.is_empty() && !fields.contains(&name) {
                    fields.push(name);
                }
            }
            config.extraction.required_fields = fields;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "KYC_MAX_DOCUMENT_BYTES")? {
            config.extraction.max_document_bytes = v;
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "KYC_MAX_RETRIES")? {
            config.evaluation.max_retries = v;
        }
        if let Some(v) = parse_var::<f32, _>(&lookup, "KYC_REJECT_AT")? {
            config.decision.reject_at = v;
        }
        if let Some(v) = parse_var::<f32, _>(&lookup, "KYC_REVIEW_AT")? {
            config.decision.review_at = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "KYC_EXTRACTION_TIMEOUT_SECS")? {
            config.timeouts.extraction = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "KYC_EVALUATION_TIMEOUT_SECS")? {
            config.timeouts.evaluation = Duration::from_secs(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the decision policy incoherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("min_required_confidence", self.extraction.min_required_confidence)?;
        check_unit("reject_at", self.decision.reject_at)?;
        check_unit("review_at", self.decision.review_at)?;

        if self.decision.review_at > self.decision.reject_at {
            return Err(ConfigError::Invalid {
                key: "review_at",
                reason: format!(
                    "{} is above reject_at {}",
                    self.decision.review_at, self.decision.reject_at
                ),
            });
        }
        if self.extraction.required_fields.is_empty() {
            return Err(ConfigError::Invalid {
                key: "required_fields",
                reason: "at least one required field is needed".into(),
            });
        }
        if self.extraction.max_document_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "max_document_bytes",
                reason: "must be positive".into(),
            });
        }
        if self.timeouts.extraction.is_zero() || self.timeouts.evaluation.is_zero() {
            return Err(ConfigError::Invalid {
                key: "timeouts",
                reason: "timeouts must be positive".into(),
            });
        }
        Ok(())
    }
}

fn check_unit(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("{value} is outside [0, 1]"),
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
    }
}

// ──────────────────────────────────────────────
// External service settings
// ──────────────────────────────────────────────

/// Google Document AI processor coordinates.
#[derive(Debug, Clone)]
pub struct DocumentAiSettings {
    pub endpoint: String,
    pub project_id: String,
    pub location: String,
    pub processor_id: String,
    pub credentials: DocumentAiCredentials,
}

/// How the Document AI client authenticates.
#[derive(Clone)]
pub enum DocumentAiCredentials {
    /// A pre-minted OAuth access token, used as-is until it expires.
    AccessToken(String),
    /// A service account key; access tokens are minted and refreshed from it.
    ServiceAccount(ServiceAccountKey),
}

impl fmt::Debug for DocumentAiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessToken(_) => f.write_str("AccessToken([REDACTED])"),
            Self::ServiceAccount(key) => f.debug_tuple("ServiceAccount").field(key).finish(),
        }
    }
}

/// The fields of a Google service account JSON key that token minting uses.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let key: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Invalid {
            key: "KYC_DOCUMENT_AI_CREDENTIALS",
            reason: format!("not a service account key: {e}"),
        })?;
        if key.client_email.trim().is_empty() || key.private_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "KYC_DOCUMENT_AI_CREDENTIALS",
                reason: "client_email and private_key are required".into(),
            });
        }
        Ok(key)
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// OpenAI-compatible chat completion service.
#[derive(Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub document_ai: DocumentAiSettings,
    pub llm: LlmSettings,
    pub bind_addr: SocketAddr,
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let location = lookup("KYC_DOCUMENT_AI_LOCATION").unwrap_or_else(|| "us".to_string());
        let endpoint = lookup("KYC_DOCUMENT_AI_ENDPOINT")
            .unwrap_or_else(|| format!("https://{location}-documentai.googleapis.com"));

        let processor_id = required(&lookup, "KYC_DOCUMENT_AI_PROCESSOR")?;
        let credentials = document_ai_credentials(&lookup)?;
        // A service account key names its own project
        let project_id = match (&credentials, lookup("KYC_DOCUMENT_AI_PROJECT")) {
            (_, Some(project)) if !project.trim().is_empty() => project,
            (DocumentAiCredentials::ServiceAccount(key), _) => key
                .project_id
                .clone()
                .filter(|p| !p.trim().is_empty())
                .ok_or(ConfigError::Missing("KYC_DOCUMENT_AI_PROJECT"))?,
            _ => return Err(ConfigError::Missing("KYC_DOCUMENT_AI_PROJECT")),
        };

        let document_ai = DocumentAiSettings {
            endpoint,
            project_id,
            location,
            processor_id,
            credentials,
        };

        let llm = LlmSettings {
            base_url: lookup("KYC_LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: required(&lookup, "KYC_LLM_API_KEY")?,
            model: lookup("KYC_LLM_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
        };

        let bind_addr = match lookup("KYC_BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    key: "KYC_BIND_ADDR",
                    reason: e.to_string(),
                }
            })?,
            None => SocketAddr::from(([127, 0, 0, 1], 8080)),
        };

        Ok(Self {
            document_ai,
            llm,
            bind_addr,
        })
    }
}

/// Inline key JSON wins over a key file, which wins over a static token.
fn document_ai_credentials<F>(lookup: &F) -> Result<DocumentAiCredentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(json) = non_empty("KYC_DOCUMENT_AI_CREDENTIALS") {
        return ServiceAccountKey::from_json(&json).map(DocumentAiCredentials::ServiceAccount);
    }
    if let Some(path) = non_empty("KYC_DOCUMENT_AI_CREDENTIALS_FILE") {
        let json = std::fs::read_to_string(path.trim()).map_err(|e| ConfigError::Invalid {
            key: "KYC_DOCUMENT_AI_CREDENTIALS_FILE",
            reason: format!("{}: {e}", path.trim()),
        })?;
        return ServiceAccountKey::from_json(&json).map(DocumentAiCredentials::ServiceAccount);
    }
    if let Some(token) = non_empty("KYC_DOCUMENT_AI_TOKEN") {
        return Ok(DocumentAiCredentials::AccessToken(token));
    }
    Err(ConfigError::Missing("KYC_DOCUMENT_AI_CREDENTIALS"))
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}
