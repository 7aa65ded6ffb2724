//! Repository trait for conversation persistence.

use async_trait::async_trait;

use super::model::ConversationRecord;
use crate::error::Result;

/// Persistent storage for finalized conversation turns.
///
/// `save` merges: turns in the record are appended to whatever is already
/// stored under the same conversation id. Failures are surfaced as `Err`;
/// the manager downgrades them to a reported boolean so a streamed answer
/// is never invalidated by a storage problem.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn save(&self, record: &ConversationRecord) -> Result<()>;
    async fn find_by_id(&self, conversation_id: &str) -> Result<Option<ConversationRecord>>;
    async fn list_all(&self) -> Result<Vec<ConversationRecord>>;
    async fn delete(&self, conversation_id: &str) -> Result<()>;
}
