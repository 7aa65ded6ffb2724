//! Conversation domain module.
//!
//! One conversation is a multi-turn dialog with the AI backend, keyed by an
//! opaque id so follow-up queries can be correlated. The manager owns the
//! lifecycle: creation, accumulation of raw stream events, finalization
//! (persistence) and cancellation/cleanup.

mod manager;
mod model;
mod repository;

pub use manager::ConversationManager;
pub use model::{Conversation, ConversationRecord, TurnRecord};
pub use repository::ConversationRepository;
