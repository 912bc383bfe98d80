pub mod openai;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod sanitize;
pub mod types;

pub use openai::*;
pub use orchestrator::*;
pub use parser::*;
pub use prompt::*;
pub use sanitize::*;
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Language model service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Malformed language model response: {0}")]
    MalformedResponse(String),
}

impl EvaluationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable(_) => "EVALUATION_UNAVAILABLE",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
        }
    }
}
