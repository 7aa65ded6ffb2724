//! Concrete stream transport for the AgriHub AI search core.
//!
//! Implements [`agrihub_core::stream::AnswerTransport`] over the backend's
//! streaming HTTP line protocol.

mod wire;
mod workflow_api_client;

pub use workflow_api_client::WorkflowApiClient;
