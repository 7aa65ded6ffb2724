//! JSON-directory ConversationRepository implementation.
//!
//! Directory structure:
//! ```text
//! base_dir/
//! └── conversations/
//!     ├── conversation-id-1.json
//!     └── conversation-id-2.json
//! ```
//!
//! Writes go to a `.tmp` sibling first and are renamed into place, so a
//! crash mid-write never leaves a torn record behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use agrihub_core::conversation::{ConversationRecord, ConversationRepository};
use agrihub_core::error::{Result, SearchError};

/// File-backed conversation store, one JSON document per conversation id.
///
/// Conversation ids are used directly as file names and are expected to be
/// filename-safe (generated ids are UUIDs).
pub struct JsonDirConversationRepository {
    conversations_dir: PathBuf,
}

impl JsonDirConversationRepository {
    /// Creates a repository at the default location under the platform
    /// config directory (e.g. `~/.config/agrihub`).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration directory cannot be determined
    /// or the directory structure cannot be created.
    pub async fn default_location() -> Result<Self> {
        let base_dir = dirs::config_dir()
            .ok_or_else(|| SearchError::config("could not determine config directory"))?
            .join("agrihub");
        Self::new(base_dir).await
    }

    /// Creates a new repository rooted at `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let conversations_dir = base_dir.as_ref().join("conversations");
        fs::create_dir_all(&conversations_dir).await?;
        Ok(Self { conversations_dir })
    }

    fn record_path(&self, conversation_id: &str) -> PathBuf {
        self.conversations_dir.join(format!("{conversation_id}.json"))
    }

    async fn read_record(&self, path: &Path) -> Result<Option<ConversationRecord>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, path: &Path, record: &ConversationRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for JsonDirConversationRepository {
    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        let path = self.record_path(&record.conversation_id);

        let merged = match self.read_record(&path).await? {
            Some(mut existing) => {
                existing.turns.extend(record.turns.clone());
                existing.user = record.user.clone();
                existing
            }
            None => record.clone(),
        };

        self.write_record(&path, &merged).await?;
        tracing::debug!(
            conversation_id = %record.conversation_id,
            turns = merged.turns.len(),
            "conversation record saved"
        );
        Ok(())
    }

    async fn find_by_id(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        self.read_record(&self.record_path(conversation_id)).await
    }

    async fn list_all(&self) -> Result<Vec<ConversationRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.conversations_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable conversation record");
                }
            }
        }
        Ok(records)
    }

    async fn delete(&self, conversation_id: &str) -> Result<()> {
        match fs::remove_file(self.record_path(conversation_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrihub_core::conversation::TurnRecord;
    use agrihub_core::stream::UsageStats;

    fn record(id: &str, answer: &str) -> ConversationRecord {
        ConversationRecord {
            conversation_id: id.to_string(),
            user: "guest-1".to_string(),
            turns: vec![TurnRecord {
                query: "水稻稻瘟病如何防治".to_string(),
                answer: answer.to_string(),
                usage: Some(UsageStats {
                    elapsed_time: Some(2.0),
                    total_tokens: Some(100),
                    total_steps: Some(2),
                }),
                started_at: "2026-08-01T00:00:00Z".to_string(),
                finished_at: "2026-08-01T00:00:05Z".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonDirConversationRepository::new(dir.path()).await.unwrap();

        repo.save(&record("conv-1", "建议使用三环唑。")).await.unwrap();
        let stored = repo.find_by_id("conv-1").await.unwrap().unwrap();
        assert_eq!(stored.turns[0].answer, "建议使用三环唑。");
        assert_eq!(stored.turns[0].usage.as_ref().unwrap().total_tokens, Some(100));
    }

    #[tokio::test]
    async fn save_merges_continuation_turns() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonDirConversationRepository::new(dir.path()).await.unwrap();

        repo.save(&record("conv-1", "第一答")).await.unwrap();
        repo.save(&record("conv-1", "第二答")).await.unwrap();

        let stored = repo.find_by_id("conv-1").await.unwrap().unwrap();
        assert_eq!(stored.turns.len(), 2);
        assert_eq!(stored.turns[0].answer, "第一答");
        assert_eq!(stored.turns[1].answer, "第二答");
    }

    #[tokio::test]
    async fn find_unknown_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonDirConversationRepository::new(dir.path()).await.unwrap();
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_all_skips_non_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonDirConversationRepository::new(dir.path()).await.unwrap();

        repo.save(&record("conv-1", "答一")).await.unwrap();
        repo.save(&record("conv-2", "答二")).await.unwrap();
        tokio::fs::write(dir.path().join("conversations/notes.txt"), "x")
            .await
            .unwrap();

        let records = repo.list_all().await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonDirConversationRepository::new(dir.path()).await.unwrap();

        repo.save(&record("conv-1", "答")).await.unwrap();
        repo.delete("conv-1").await.unwrap();
        repo.delete("conv-1").await.unwrap();
        assert!(repo.find_by_id("conv-1").await.unwrap().is_none());
    }
}
