//! Streaming event model and transport contract.
//!
//! The AI backend pushes a sequence of tagged events over one streaming call
//! per query. Instead of four independent callback slots (delta / workflow /
//! error / complete), the transport surfaces a single `mpsc` channel of
//! [`StreamEvent`] consumed by one receive loop; channel close without a
//! prior `Error` event is the completion signal.

mod throttle;

pub use throttle::{AdaptiveThrottle, FinalAnswer, ThrottleConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::error::Result;

/// A named backend processing stage reported via progress events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub title: String,
    pub node_type: String,
    pub index: u32,
}

/// Backend-reported resource usage for one finished turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
}

/// Events emitted by the AI backend during one streaming turn.
///
/// Immutable once received; appended to a conversation's event log in
/// arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The backend started executing the answer workflow.
    WorkflowStarted { workflow_id: String },
    /// A new processing stage began. The previous stage is considered
    /// complete once this arrives.
    NodeStarted {
        title: String,
        node_type: String,
        index: u32,
    },
    /// The workflow ran to completion (successfully or not, per `status`).
    WorkflowFinished {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outputs: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elapsed_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_steps: Option<u32>,
    },
    /// An answer fragment. Fragments are incremental: each one appends to
    /// the answer accumulated so far, never replaces it.
    MessageDelta { answer: String },
    /// Terminal backend failure. No further events follow.
    Error { message: String },
}

impl StreamEvent {
    /// Returns true for events that end the turn (`WorkflowFinished` is not
    /// terminal by itself; the channel closing is the completion signal).
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// One user query addressed to the AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Reuse an existing id to continue a dialog; `None` starts a fresh one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub query: String,
    /// Structured inputs forwarded verbatim to the backend workflow.
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    /// Guest or account identifier from the session identity provider.
    pub user: String,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            query: query.into(),
            inputs: HashMap::new(),
            user: user.into(),
        }
    }

    /// Continues an existing conversation.
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// One streaming call per query against the AI backend.
///
/// Implementations must deliver events in backend emission order, emit
/// `Error` at most once (terminal), and close the channel exactly once on
/// clean termination. No implicit retries; retry policy belongs to the
/// caller. The transport does not buffer beyond the channel capacity - a
/// slow consumer relies on the adaptive throttle, not the transport, to
/// avoid losing final state.
#[async_trait]
pub trait AnswerTransport: Send + Sync {
    async fn send_message(&self, request: &QueryRequest) -> Result<mpsc::Receiver<StreamEvent>>;
}
