//! Conversation lifecycle management.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::model::{Conversation, ConversationRecord, TurnRecord};
use super::repository::ConversationRepository;
use crate::error::{Result, SearchError};
use crate::stream::QueryRequest;
use crate::stream::StreamEvent;

/// Manages active conversations and their lifecycle.
///
/// `ConversationManager` is responsible for:
/// - Creating a conversation on the first query of a turn
/// - Appending raw stream events as they arrive
/// - Finalizing a turn (answer assembly + persistence)
/// - Discarding transient state on error or explicit reset
///
/// The in-memory registry is the only shared mutable state in the core.
/// Operations on distinct conversation ids never contend; a single turn per
/// id is enforced by the `DuplicateActiveTurn` failure rather than by
/// locking.
pub struct ConversationManager {
    /// Active (unfinalized) conversations keyed by id
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
    /// Persistence outcome of already-finalized turns, so a repeated
    /// finalize returns a consistent result without saving twice
    finalized: Arc<RwLock<HashMap<String, bool>>>,
    /// Persistent storage backend for finalized turns
    repository: Arc<dyn ConversationRepository>,
}

impl ConversationManager {
    pub fn new(repository: Arc<dyn ConversationRepository>) -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            finalized: Arc::new(RwLock::new(HashMap::new())),
            repository,
        }
    }

    /// Opens a new turn for the request's conversation id (generated when
    /// the request carries none) and returns the effective id.
    ///
    /// # Errors
    ///
    /// Fails with [`SearchError::DuplicateActiveTurn`] if the id already has
    /// an unfinalized in-flight turn. The caller must finalize or clear the
    /// prior turn first.
    pub async fn start_conversation(&self, request: &QueryRequest) -> Result<String> {
        let id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut conversations = self.conversations.write().await;
        if conversations.contains_key(&id) {
            return Err(SearchError::duplicate_active_turn(&id));
        }

        // A new turn supersedes the previous turn's finalize outcome.
        self.finalized.write().await.remove(&id);

        tracing::debug!(conversation_id = %id, user = %request.user, "conversation turn started");
        conversations.insert(
            id.clone(),
            Conversation::new(&id, &request.query, request.inputs.clone(), &request.user),
        );
        Ok(id)
    }

    /// Appends a stream event to the conversation's log.
    ///
    /// Unknown ids are tolerated (logged, not fatal): transport callbacks
    /// can race a `clear_conversation`, and a late event must not resurrect
    /// a discarded conversation.
    pub async fn on_stream_message(&self, conversation_id: &str, event: StreamEvent) {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(conversation_id) {
            Some(conversation) => conversation.events.push(event),
            None => {
                tracing::warn!(
                    conversation_id,
                    ?event,
                    "stream event for unknown conversation, dropped"
                );
            }
        }
    }

    /// Finalizes the conversation's turn: assembles the final answer from
    /// the logged fragments, persists the turn and evicts the conversation
    /// from the registry.
    ///
    /// Returns whether persistence succeeded. Persistence failure is
    /// reported, never thrown, so the UI can still show the answer that
    /// streamed successfully. Safe to call with zero deltas received (an
    /// empty placeholder record is persisted). Idempotent: a repeated call
    /// returns the recorded outcome without persisting again.
    pub async fn finish_conversation(&self, conversation_id: &str) -> bool {
        if let Some(result) = self.finalized.read().await.get(conversation_id) {
            tracing::debug!(conversation_id, "finish called twice, returning recorded outcome");
            return *result;
        }

        let conversation = {
            let mut conversations = self.conversations.write().await;
            conversations.remove(conversation_id)
        };
        let Some(mut conversation) = conversation else {
            tracing::warn!(conversation_id, "finish for unknown conversation");
            return false;
        };

        let answer = conversation.accumulated_answer();
        conversation.final_answer = Some(answer.clone());

        let record = ConversationRecord {
            conversation_id: conversation.id.clone(),
            user: conversation.user.clone(),
            turns: vec![TurnRecord {
                query: conversation.query.clone(),
                answer,
                usage: conversation.usage(),
                started_at: conversation.started_at.clone(),
                finished_at: chrono::Utc::now().to_rfc3339(),
            }],
        };

        let persisted = match self.repository.save(&record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "failed to persist conversation turn");
                false
            }
        };

        self.finalized
            .write()
            .await
            .insert(conversation_id.to_string(), persisted);
        persisted
    }

    /// Discards in-memory state for the conversation immediately, without
    /// persisting. Used on transport error or explicit reset.
    pub async fn clear_conversation(&self, conversation_id: &str) {
        let removed = self
            .conversations
            .write()
            .await
            .remove(conversation_id)
            .is_some();
        self.finalized.write().await.remove(conversation_id);
        tracing::debug!(conversation_id, removed, "conversation cleared");
    }

    /// Returns a snapshot of an active conversation, if any.
    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.read().await.get(conversation_id).cloned()
    }

    /// True while the id has an unfinalized in-flight turn.
    pub async fn is_active(&self, conversation_id: &str) -> bool {
        self.conversations.read().await.contains_key(conversation_id)
    }
}
