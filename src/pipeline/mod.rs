pub mod import;
pub mod extraction;
pub mod risk;
pub mod decision;
pub mod processor; // Entry point: extract → evaluate risk → decide

pub use processor::{EvaluationReport, KycPipeline, PipelineError, StageFailure};
