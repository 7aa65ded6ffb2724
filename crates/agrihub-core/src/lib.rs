//! Core of the AgriHub AI search experience.
//!
//! This crate owns the streaming answer orchestration: consuming the
//! backend's multi-event stream, reconstructing a coherent answer under
//! backpressure, tracking workflow progress, managing conversation
//! lifecycle and persistence, and deriving structured results from the
//! finalized answer.
//!
//! # Module Structure
//!
//! - `stream`: stream event model, transport contract and adaptive throttle
//! - `workflow`: workflow progress state machine
//! - `conversation`: conversation lifecycle, registry and persistence trait
//! - `answer`: post-processing of finalized answers into search results
//! - `turn`: orchestration of one query-to-final-answer cycle

pub mod answer;
pub mod conversation;
pub mod error;
pub mod stream;
pub mod turn;
pub mod workflow;

// Re-export common error type
pub use error::{Result, SearchError};
