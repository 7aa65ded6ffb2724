//! One query-to-final-answer cycle.
//!
//! `SearchTurn` drives the control flow of a single turn: open the stream,
//! fold workflow events into the progress view, pass content deltas through
//! the adaptive throttle, finalize and persist on completion, and derive
//! structured results from the final answer. A transport error clears the
//! conversation's transient state before the error is forwarded, so nothing
//! is ever left half-initialized.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::answer::{AnswerAnalyzer, SearchResult};
use crate::conversation::ConversationManager;
use crate::error::{Result, SearchError};
use crate::stream::{AdaptiveThrottle, AnswerTransport, FinalAnswer, QueryRequest, StreamEvent, UsageStats};
use crate::workflow::WorkflowProgress;

/// UI-visible updates emitted while a turn is streaming.
#[derive(Debug, Clone)]
pub enum TurnUpdate {
    /// Throttled view of the accumulated answer so far.
    Answer(String),
    /// Snapshot of the workflow progress after a non-content event.
    Workflow(WorkflowProgress),
}

/// Everything a finished turn hands to the rendering layer.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub answer: FinalAnswer,
    pub results: Vec<SearchResult>,
    pub workflow: WorkflowProgress,
    pub usage: Option<UsageStats>,
    /// Whether the finalized turn reached storage. A `false` here never
    /// invalidates the streamed answer.
    pub persisted: bool,
}

/// Orchestrates single turns against a transport, a conversation manager
/// and an answer analyzer.
///
/// Retry is the caller's policy: on a transport error, re-invoking [`run`]
/// with the identical query starts a fresh turn (the failed turn's state is
/// already cleared).
///
/// [`run`]: SearchTurn::run
pub struct SearchTurn {
    manager: Arc<ConversationManager>,
    transport: Arc<dyn AnswerTransport>,
    analyzer: AnswerAnalyzer,
}

impl SearchTurn {
    pub fn new(manager: Arc<ConversationManager>, transport: Arc<dyn AnswerTransport>) -> Self {
        Self::with_analyzer(manager, transport, AnswerAnalyzer::default())
    }

    pub fn with_analyzer(
        manager: Arc<ConversationManager>,
        transport: Arc<dyn AnswerTransport>,
        analyzer: AnswerAnalyzer,
    ) -> Self {
        Self {
            manager,
            transport,
            analyzer,
        }
    }

    /// Runs one turn to completion.
    ///
    /// Visible updates (throttled answer text, workflow snapshots) flow
    /// through `updates` while the stream is live; the finalized outcome is
    /// returned once the backend closes the stream.
    ///
    /// # Errors
    ///
    /// [`SearchError::DuplicateActiveTurn`] if the conversation id already
    /// has an in-flight turn; [`SearchError::Transport`] if the stream fails
    /// to open or the backend emits a terminal error event. In both cases
    /// the conversation's transient state has been cleared and the same
    /// query can be re-issued as a fresh turn.
    pub async fn run(
        &self,
        request: QueryRequest,
        updates: mpsc::UnboundedSender<TurnUpdate>,
    ) -> Result<TurnOutcome> {
        let conversation_id = self.manager.start_conversation(&request).await?;
        let request = request.with_conversation_id(conversation_id.clone());

        let mut events = match self.transport.send_message(&request).await {
            Ok(receiver) => receiver,
            Err(e) => {
                self.manager.clear_conversation(&conversation_id).await;
                return Err(e);
            }
        };

        let (answer_tx, mut answer_rx) = mpsc::unbounded_channel();
        let throttle = AdaptiveThrottle::new(answer_tx);
        let forward_to = updates.clone();
        let forward = tokio::spawn(async move {
            while let Some(answer) = answer_rx.recv().await {
                if forward_to.send(TurnUpdate::Answer(answer)).is_err() {
                    break;
                }
            }
        });

        let mut progress = WorkflowProgress::new();
        let mut accumulated = String::new();

        while let Some(event) = events.recv().await {
            self.manager
                .on_stream_message(&conversation_id, event.clone())
                .await;

            match &event {
                StreamEvent::MessageDelta { answer } => {
                    accumulated.push_str(answer);
                    throttle.offer(accumulated.clone());
                }
                StreamEvent::Error { message } => {
                    tracing::warn!(%conversation_id, %message, "turn aborted by transport error");
                    throttle.cancel();
                    progress.apply(&event);
                    let _ = updates.send(TurnUpdate::Workflow(progress.clone()));
                    self.manager.clear_conversation(&conversation_id).await;
                    drop(throttle);
                    let _ = forward.await;
                    return Err(SearchError::transport(message));
                }
                _ => {
                    progress.apply(&event);
                    let _ = updates.send(TurnUpdate::Workflow(progress.clone()));
                }
            }
        }

        // Channel closed without an error event: clean completion.
        let usage = self
            .manager
            .get(&conversation_id)
            .await
            .and_then(|c| c.usage());
        let persisted = self.manager.finish_conversation(&conversation_id).await;

        let answer = throttle.finish(accumulated);
        drop(throttle);
        let _ = forward.await;

        let results = match &answer {
            FinalAnswer::Content(text) => self.analyzer.analyze(text),
            FinalAnswer::Empty => vec![AnswerAnalyzer::retry_result()],
        };

        Ok(TurnOutcome {
            conversation_id,
            answer,
            results,
            workflow: progress,
            usage,
            persisted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationRecord, ConversationRepository};
    use crate::workflow::WorkflowPhase;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryRepository {
        records: Mutex<HashMap<String, ConversationRecord>>,
    }

    impl MemoryRepository {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl ConversationRepository for MemoryRepository {
        async fn save(&self, record: &ConversationRecord) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            records
                .entry(record.conversation_id.clone())
                .and_modify(|existing| existing.turns.extend(record.turns.clone()))
                .or_insert_with(|| record.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<ConversationRecord>> {
            Ok(self.records.lock().unwrap().get(id).cloned())
        }

        async fn list_all(&self) -> Result<Vec<ConversationRecord>> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.records.lock().unwrap().remove(id);
            Ok(())
        }
    }

    /// Replays a scripted event sequence as one backend stream.
    struct ScriptedTransport {
        events: Vec<StreamEvent>,
    }

    #[async_trait]
    impl AnswerTransport for ScriptedTransport {
        async fn send_message(&self, _request: &QueryRequest) -> Result<mpsc::Receiver<StreamEvent>> {
            let (tx, rx) = mpsc::channel(16);
            let events = self.events.clone();
            tokio::spawn(async move {
                for event in events {
                    let terminal = event.is_error();
                    if tx.send(event).await.is_err() || terminal {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn turn(events: Vec<StreamEvent>) -> (SearchTurn, Arc<ConversationManager>) {
        let manager = Arc::new(ConversationManager::new(Arc::new(MemoryRepository::new())));
        let transport = Arc::new(ScriptedTransport { events });
        (SearchTurn::new(manager.clone(), transport), manager)
    }

    fn delta(fragment: &str) -> StreamEvent {
        StreamEvent::MessageDelta {
            answer: fragment.to_string(),
        }
    }

    #[tokio::test]
    async fn rice_blast_query_yields_confident_tagged_answer() {
        let (turn, _manager) = turn(vec![
            StreamEvent::WorkflowStarted {
                workflow_id: "wf-1".to_string(),
            },
            StreamEvent::NodeStarted {
                title: "检索知识库".to_string(),
                node_type: "retrieval".to_string(),
                index: 1,
            },
            delta("根据您的问题，"),
            delta("我推荐使用杀菌剂三环唑，按75%可湿性粉剂1000倍液喷雾防治稻瘟病。"),
            StreamEvent::WorkflowFinished {
                status: "succeeded".to_string(),
                outputs: None,
                elapsed_time: Some(2.1),
                total_tokens: Some(480),
                total_steps: Some(2),
            },
        ]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = turn
            .run(
                QueryRequest::new("水稻稻瘟病如何防治", "guest-1")
                    .with_conversation_id("conv-rice"),
                tx,
            )
            .await
            .unwrap();

        assert_eq!(outcome.conversation_id, "conv-rice");
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].confidence_score >= 0.9);
        assert!(outcome.results[0].tags.contains("杀菌剂"));
        assert_eq!(outcome.workflow.phase, WorkflowPhase::Finished);
        assert_eq!(outcome.usage.as_ref().unwrap().total_tokens, Some(480));
        assert!(outcome.persisted);
        match outcome.answer {
            FinalAnswer::Content(text) => assert!(text.starts_with("根据您的问题，")),
            FinalAnswer::Empty => panic!("expected content"),
        }
    }

    #[tokio::test]
    async fn error_before_any_delta_clears_and_allows_retry() {
        let (search_turn, manager) = turn(vec![StreamEvent::Error {
            message: "网络连接失败".to_string(),
        }]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let request = QueryRequest::new("小麦白粉病用什么药", "guest-1")
            .with_conversation_id("conv-err");
        let err = search_turn.run(request.clone(), tx).await.unwrap_err();
        assert!(err.is_transport());
        assert!(!manager.is_active("conv-err").await);

        // Retry re-issues the identical query against a fresh turn.
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = search_turn.run(request, tx).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn completion_without_deltas_yields_synthetic_retry_result() {
        let (turn, _manager) = turn(vec![
            StreamEvent::WorkflowStarted {
                workflow_id: "wf-1".to_string(),
            },
            StreamEvent::WorkflowFinished {
                status: "succeeded".to_string(),
                outputs: None,
                elapsed_time: None,
                total_tokens: None,
                total_steps: None,
            },
        ]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = turn
            .run(
                QueryRequest::new("空问题", "guest-1").with_conversation_id("conv-empty"),
                tx,
            )
            .await
            .unwrap();

        assert_eq!(outcome.answer, FinalAnswer::Empty);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].tags.contains("重试"));
        // The empty turn is still persisted as a placeholder record.
        assert!(outcome.persisted);
    }

    #[tokio::test]
    async fn duplicate_turn_is_rejected_while_prior_is_active() {
        let manager = Arc::new(ConversationManager::new(Arc::new(MemoryRepository::new())));
        manager
            .start_conversation(
                &QueryRequest::new("第一问", "guest-1").with_conversation_id("conv-dup"),
            )
            .await
            .unwrap();

        let transport = Arc::new(ScriptedTransport { events: vec![] });
        let search_turn = SearchTurn::new(manager.clone(), transport);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = search_turn
            .run(
                QueryRequest::new("第二问", "guest-1").with_conversation_id("conv-dup"),
                tx,
            )
            .await
            .unwrap_err();
        assert!(err.is_duplicate_active_turn());
        // The original turn was not disturbed.
        assert!(manager.is_active("conv-dup").await);
    }

    #[tokio::test]
    async fn streamed_updates_arrive_in_order_and_end_on_final_answer() {
        let (turn, _manager) = turn(vec![
            delta("第一"),
            delta("第二"),
            delta("第三"),
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = turn
            .run(
                QueryRequest::new("q", "guest-1").with_conversation_id("conv-ord"),
                tx,
            )
            .await
            .unwrap();

        let mut answers = Vec::new();
        while let Ok(update) = rx.try_recv() {
            if let TurnUpdate::Answer(a) = update {
                answers.push(a);
            }
        }
        assert_eq!(answers.last().map(String::as_str), Some("第一第二第三"));
        for pair in answers.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
        assert_eq!(
            outcome.answer,
            FinalAnswer::Content("第一第二第三".to_string())
        );
    }
}
