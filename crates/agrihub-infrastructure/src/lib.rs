//! Storage implementations for the AgriHub AI search core.
//!
//! Provides the [`agrihub_core::conversation::ConversationRepository`]
//! backends: an in-memory registry for tests and embedded use, and a
//! JSON-file-per-conversation directory store.

mod json_dir_conversation_repository;
mod memory_conversation_repository;

pub use json_dir_conversation_repository::JsonDirConversationRepository;
pub use memory_conversation_repository::InMemoryConversationRepository;
