//! End-to-end turn flow against a scripted backend stream.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use agrihub_core::conversation::{ConversationManager, ConversationRepository};
use agrihub_core::error::Result;
use agrihub_core::stream::{AnswerTransport, FinalAnswer, QueryRequest, StreamEvent};
use agrihub_core::turn::{SearchTurn, TurnUpdate};
use agrihub_core::workflow::WorkflowPhase;
use agrihub_infrastructure::InMemoryConversationRepository;

/// Replays a scripted event sequence as one backend stream per query.
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

fn delta(fragment: &str) -> StreamEvent {
    StreamEvent::MessageDelta {
        answer: fragment.to_string(),
    }
}

fn node(title: &str, index: u32) -> StreamEvent {
    StreamEvent::NodeStarted {
        title: title.to_string(),
        node_type: "llm".to_string(),
        index,
    }
}

fn finished(tokens: u64) -> StreamEvent {
    StreamEvent::WorkflowFinished {
        status: "succeeded".to_string(),
        outputs: None,
        elapsed_time: Some(1.5),
        total_tokens: Some(tokens),
        total_steps: Some(2),
    }
}

#[tokio::test]
async fn full_turn_streams_persists_and_postprocesses() {
    let repository = Arc::new(InMemoryConversationRepository::new());
    let manager = Arc::new(ConversationManager::new(repository.clone()));
    let transport = Arc::new(ScriptedTransport {
        events: vec![
            StreamEvent::WorkflowStarted {
                workflow_id: "wf-1".to_string(),
            },
            node("检索知识库", 1),
            delta("根据您的问题，"),
            node("生成回答", 2),
            delta("我推荐使用杀菌剂三环唑，按75%可湿性粉剂1000倍液均匀喷雾防治稻瘟病。"),
            finished(812),
        ],
    });
    let turn = SearchTurn::new(manager.clone(), transport);

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let outcome = turn
        .run(
            QueryRequest::new("水稻稻瘟病如何防治", "guest-42").with_conversation_id("conv-e2e"),
            updates_tx,
        )
        .await
        .unwrap();

    // Workflow ran to completion with both stages recorded in order.
    assert_eq!(outcome.workflow.phase, WorkflowPhase::Finished);
    let stages: Vec<&str> = outcome
        .workflow
        .completed_nodes
        .iter()
        .map(|n| n.title.as_str())
        .collect();
    assert_eq!(stages, vec!["检索知识库", "生成回答"]);

    // The final visible answer equals the concatenated deltas.
    let expected = "根据您的问题，我推荐使用杀菌剂三环唑，按75%可湿性粉剂1000倍液均匀喷雾防治稻瘟病。";
    assert_eq!(outcome.answer, FinalAnswer::Content(expected.to_string()));

    // Post-processing derived one confident, tagged result.
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.results[0].confidence_score >= 0.9);
    assert!(outcome.results[0].tags.contains("杀菌剂"));
    assert!(outcome.results[0].tags.contains("稻瘟病"));

    // The turn reached storage with its usage stats.
    assert!(outcome.persisted);
    let record = repository.find_by_id("conv-e2e").await.unwrap().unwrap();
    assert_eq!(record.user, "guest-42");
    assert_eq!(record.turns.len(), 1);
    assert_eq!(record.turns[0].answer, expected);
    assert_eq!(record.turns[0].usage.as_ref().unwrap().total_tokens, Some(812));

    // Consumer-visible updates end on the final answer, in prefix order.
    let mut answers = Vec::new();
    while let Ok(update) = updates_rx.try_recv() {
        if let TurnUpdate::Answer(a) = update {
            answers.push(a);
        }
    }
    assert_eq!(answers.last().map(String::as_str), Some(expected));
    for pair in answers.windows(2) {
        assert!(pair[1].starts_with(&pair[0]));
    }
}

#[tokio::test]
async fn continuation_accumulates_turns_under_one_id() {
    let repository = Arc::new(InMemoryConversationRepository::new());
    let manager = Arc::new(ConversationManager::new(repository.clone()));

    let first = SearchTurn::new(
        manager.clone(),
        Arc::new(ScriptedTransport {
            events: vec![delta("稻瘟病建议使用三环唑防治。"), finished(100)],
        }),
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    first
        .run(
            QueryRequest::new("水稻稻瘟病如何防治", "guest-42").with_conversation_id("conv-cont"),
            tx,
        )
        .await
        .unwrap();

    let follow_up = SearchTurn::new(
        manager.clone(),
        Arc::new(ScriptedTransport {
            events: vec![delta("一般间隔7到10天再喷一次。"), finished(80)],
        }),
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    let outcome = follow_up
        .run(
            QueryRequest::new("多久打一次药", "guest-42").with_conversation_id("conv-cont"),
            tx,
        )
        .await
        .unwrap();
    assert!(outcome.persisted);

    let record = repository.find_by_id("conv-cont").await.unwrap().unwrap();
    assert_eq!(record.turns.len(), 2);
    assert_eq!(record.turns[0].query, "水稻稻瘟病如何防治");
    assert_eq!(record.turns[1].query, "多久打一次药");
}

#[tokio::test]
async fn transport_error_clears_state_and_retry_succeeds() {
    let repository = Arc::new(InMemoryConversationRepository::new());
    let manager = Arc::new(ConversationManager::new(repository.clone()));

    let failing = SearchTurn::new(
        manager.clone(),
        Arc::new(ScriptedTransport {
            events: vec![StreamEvent::Error {
                message: "网络连接失败".to_string(),
            }],
        }),
    );
    let request =
        QueryRequest::new("小麦蚜虫用什么药", "guest-42").with_conversation_id("conv-retry");
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = failing.run(request.clone(), tx).await.unwrap_err();
    assert!(err.is_transport());
    assert!(!manager.is_active("conv-retry").await);
    // The failed turn never reached storage.
    assert!(repository.find_by_id("conv-retry").await.unwrap().is_none());

    // Retry with the identical query against a healthy stream.
    let healthy = SearchTurn::new(
        manager.clone(),
        Arc::new(ScriptedTransport {
            events: vec![delta("建议使用吡蚜酮喷雾。"), finished(60)],
        }),
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    let outcome = healthy.run(request, tx).await.unwrap();
    assert!(outcome.persisted);
    assert!(repository.find_by_id("conv-retry").await.unwrap().is_some());
}
