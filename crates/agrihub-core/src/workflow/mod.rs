//! Workflow progress tracking.
//!
//! Folds the backend's progress events into a small state machine the UI can
//! render: which named stage is currently executing and the ordered history
//! of completed stages.

use serde::{Deserialize, Serialize};

use crate::stream::{StreamEvent, WorkflowNode};

/// Lifecycle phase of the workflow for the current turn.
///
/// `Finished` and `Errored` are terminal; a new turn resets to `Idle` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Idle,
    Running,
    Finished,
    Errored,
}

/// Derived progress view, recomputed by folding stream events.
///
/// A stage only moves to `completed_nodes` once the next stage begins (or
/// the workflow finishes), so the UI always shows the stage actually
/// executing as current.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub phase: WorkflowPhase,
    pub current_node: Option<WorkflowNode>,
    pub completed_nodes: Vec<WorkflowNode>,
    /// The current node is the synthetic start placeholder shown before the
    /// first real stage reports in. Placeholders never enter
    /// `completed_nodes`.
    current_is_placeholder: bool,
}

impl Default for WorkflowProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowProgress {
    pub fn new() -> Self {
        Self {
            phase: WorkflowPhase::Idle,
            current_node: None,
            completed_nodes: Vec::new(),
            current_is_placeholder: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == WorkflowPhase::Running
    }

    /// Resets to `Idle` for a new turn.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Folds one stream event into the progress view. Content deltas are
    /// ignored; terminal phases ignore everything except the error fold.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::WorkflowStarted { workflow_id } => {
                tracing::debug!(%workflow_id, "workflow started");
                self.phase = WorkflowPhase::Running;
                self.completed_nodes.clear();
                // Immediate feedback before the first real stage reports.
                self.current_node = Some(WorkflowNode {
                    title: "开始分析".to_string(),
                    node_type: "start".to_string(),
                    index: 0,
                });
                self.current_is_placeholder = true;
            }
            StreamEvent::NodeStarted {
                title,
                node_type,
                index,
            } => {
                if self.phase != WorkflowPhase::Running {
                    return;
                }
                self.advance_current();
                self.current_node = Some(WorkflowNode {
                    title: title.clone(),
                    node_type: node_type.clone(),
                    index: *index,
                });
                self.current_is_placeholder = false;
            }
            StreamEvent::WorkflowFinished { status, .. } => {
                if self.phase != WorkflowPhase::Running {
                    return;
                }
                tracing::debug!(%status, "workflow finished");
                self.advance_current();
                self.current_node = None;
                self.phase = WorkflowPhase::Finished;
            }
            StreamEvent::Error { message } => {
                if self.phase == WorkflowPhase::Finished {
                    return;
                }
                // Completed stages are kept for diagnostic display.
                tracing::debug!(%message, "workflow errored");
                self.current_node = None;
                self.phase = WorkflowPhase::Errored;
            }
            StreamEvent::MessageDelta { .. } => {}
        }
    }

    /// Moves the current stage (if real) into the completed history.
    fn advance_current(&mut self) {
        if let Some(node) = self.current_node.take() {
            if !self.current_is_placeholder {
                self.completed_nodes.push(node);
            }
        }
        self.current_is_placeholder = false;
    }
}
