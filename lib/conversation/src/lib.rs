//! Conversation memory for the switchyard orchestration suite.
//!
//! Chatflow runs thread a per-conversation memory map through node handlers
//! and persist the final snapshot. This crate provides:
//!
//! - **Memory**: The memory map type and set/remove diffing between snapshots
//! - **Store**: The [`ConversationStore`] interface and an in-memory
//!   implementation

pub mod error;
pub mod memory;
pub mod store;

pub use error::ConversationError;
pub use memory::{ConversationMemory, MemoryDiff, apply_memory_diff, diff_memory};
pub use store::{ConversationStore, InMemoryConversationStore};
