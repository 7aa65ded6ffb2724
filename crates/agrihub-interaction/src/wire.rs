//! Wire format of the backend's streaming line protocol.
//!
//! Each payload line is `data: {json}` with an `event` discriminator.
//! Unknown event kinds (keep-alive pings, TTS fragments and similar) are
//! skipped rather than rejected, so protocol additions never break the
//! consumer.

use agrihub_core::stream::StreamEvent;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct WireEvent {
    event: String,
    #[serde(default)]
    workflow_run_id: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<WireEventData>,
}

#[derive(Debug, Default, Deserialize)]
struct WireEventData {
    #[serde(default)]
    title: String,
    #[serde(default)]
    node_type: String,
    #[serde(default)]
    index: u32,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    outputs: Option<serde_json::Value>,
    #[serde(default)]
    elapsed_time: Option<f64>,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    total_steps: Option<u32>,
}

impl WireEvent {
    fn into_event(self) -> Option<StreamEvent> {
        match self.event.as_str() {
            "workflow_started" => Some(StreamEvent::WorkflowStarted {
                workflow_id: self.workflow_run_id.unwrap_or_default(),
            }),
            "node_started" => {
                let data = self.data.unwrap_or_default();
                Some(StreamEvent::NodeStarted {
                    title: data.title,
                    node_type: data.node_type,
                    index: data.index,
                })
            }
            "workflow_finished" => {
                let data = self.data.unwrap_or_default();
                Some(StreamEvent::WorkflowFinished {
                    status: data.status.unwrap_or_else(|| "succeeded".to_string()),
                    outputs: data.outputs,
                    elapsed_time: data.elapsed_time,
                    total_tokens: data.total_tokens,
                    total_steps: data.total_steps,
                })
            }
            "message" | "agent_message" => Some(StreamEvent::MessageDelta {
                answer: self.answer.unwrap_or_default(),
            }),
            "error" => Some(StreamEvent::Error {
                message: self
                    .message
                    .unwrap_or_else(|| "unknown backend error".to_string()),
            }),
            _ => None,
        }
    }
}

/// Parses one raw line into a stream event, if it carries one.
pub(crate) fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<WireEvent>(payload) {
        Ok(wire) => wire.into_event(),
        Err(e) => {
            tracing::debug!(error = %e, line = payload, "unparseable stream line, skipped");
            None
        }
    }
}
