pub mod decision;
pub mod document;
pub mod enums;
pub mod risk;

pub use decision::*;
pub use document::*;
pub use enums::*;
pub use risk::*;

/// A string did not name any variant of the target enum.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid {field} value: '{value}'")]
pub struct ParseEnumError {
    pub field: &'static str,
    pub value: String,
}
