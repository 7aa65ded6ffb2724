//! Conversation domain models.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::stream::{StreamEvent, UsageStats};

/// In-memory state of one conversation with an in-flight or just-finished
/// turn. Owned exclusively by the [`ConversationManager`]; the event log is
/// append-only until finalize.
///
/// [`ConversationManager`]: super::ConversationManager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Guest or account identifier of the asking user.
    pub user: String,
    pub query: String,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    pub started_at: String,
    /// Raw stream events in arrival order.
    pub events: Vec<StreamEvent>,
    /// Set by finalize; `None` while the turn is streaming.
    pub final_answer: Option<String>,
}

impl Conversation {
    pub fn new(
        id: impl Into<String>,
        query: impl Into<String>,
        inputs: HashMap<String, serde_json::Value>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            query: query.into(),
            inputs,
            started_at: chrono::Utc::now().to_rfc3339(),
            events: Vec::new(),
            final_answer: None,
        }
    }

    /// Concatenates all answer fragments in arrival order.
    pub fn accumulated_answer(&self) -> String {
        let mut answer = String::new();
        for event in &self.events {
            if let StreamEvent::MessageDelta { answer: fragment } = event {
                answer.push_str(fragment);
            }
        }
        answer
    }

    /// Usage stats from the last `workflow_finished` event, if any.
    pub fn usage(&self) -> Option<UsageStats> {
        self.events.iter().rev().find_map(|event| match event {
            StreamEvent::WorkflowFinished {
                elapsed_time,
                total_tokens,
                total_steps,
                ..
            } => Some(UsageStats {
                elapsed_time: *elapsed_time,
                total_tokens: *total_tokens,
                total_steps: *total_steps,
            }),
            _ => None,
        })
    }
}

/// One finalized query-to-answer cycle, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub query: String,
    /// Empty string when the turn completed without usable content.
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
    pub started_at: String,
    pub finished_at: String,
}

/// The persisted form of a conversation handed to the storage collaborator.
///
/// Repositories append the record's turns to any turns already saved under
/// the same id, so a continuation grows one stored dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub user: String,
    pub turns: Vec<TurnRecord>,
}
