//! HTTP front end for the pipeline.
//!
//! `api_router()` returns a composable `Router`; `start_api_server()`
//! binds it and runs it in the background until shut down.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use server::{start_api_server, ApiServer, ServerError};
pub use types::ApiContext;
