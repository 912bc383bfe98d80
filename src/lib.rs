pub mod api;
pub mod config;
pub mod models;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{PipelineConfig, ServiceSettings};
use crate::pipeline::extraction::{DocumentAiClient, ExtractionError};
use crate::pipeline::risk::{EvaluationError, OpenAiClient};
use crate::pipeline::KycPipeline;

/// Startup failures. Anything after the server is up is logged instead.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Document service client: {0}")]
    DocumentService(ExtractionError),

    #[error("Risk model client: {0}")]
    RiskModel(EvaluationError),

    #[error("Runtime error: {0}")]
    Runtime(std::io::Error),

    #[error("Server error: {0}")]
    Server(#[from] api::ServerError),
}

/// Load configuration from the environment, wire the pipeline and serve
/// the HTTP API until Ctrl-C.
pub fn run() -> Result<(), RunError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let pipeline_config = PipelineConfig::from_env()?;
    let services = ServiceSettings::from_env()?;
    tracing::info!(
        bind = %services.bind_addr,
        model = %services.llm.model,
        "Configuration loaded"
    );

    // Blocking HTTP clients own their own runtime; build them before ours
    let document_ai =
        DocumentAiClient::new(&services.document_ai).map_err(RunError::DocumentService)?;
    let llm = OpenAiClient::new(&services.llm).map_err(RunError::RiskModel)?;
    let pipeline = Arc::new(KycPipeline::from_services(
        Box::new(document_ai),
        Box::new(llm),
        pipeline_config,
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(RunError::Runtime)?;

    runtime.block_on(async {
        let mut server = api::start_api_server(pipeline.clone(), services.bind_addr).await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
        }

        server.shutdown();
        server.stopped().await;
        Ok::<(), RunError>(())
    })?;

    // The runtime goes first so the last pipeline handle drops outside it
    drop(runtime);
    drop(pipeline);
    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}
