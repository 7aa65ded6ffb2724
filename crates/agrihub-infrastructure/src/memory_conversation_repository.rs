//! In-memory ConversationRepository implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use agrihub_core::conversation::{ConversationRecord, ConversationRepository};
use agrihub_core::error::Result;

/// Keeps finalized turns in process memory. Useful for tests and for
/// embedding the search core without a storage backend.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    records: Mutex<HashMap<String, ConversationRecord>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        records
            .entry(record.conversation_id.clone())
            .and_modify(|existing| existing.turns.extend(record.turns.clone()))
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn find_by_id(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.records.lock().unwrap().get(conversation_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<ConversationRecord>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn delete(&self, conversation_id: &str) -> Result<()> {
        self.records.lock().unwrap().remove(conversation_id);
        Ok(())
    }
}
