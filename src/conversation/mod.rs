//! Session conversation history.
//!
//! A store keeps saved conversations plus one active conversation that new
//! turns are appended to.

pub mod store;
pub mod types;

pub use store::{ConversationError, ConversationResult, ConversationStore};
pub use types::{Conversation, Turn};
