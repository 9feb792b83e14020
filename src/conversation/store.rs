//! In-memory conversation store for a single interactive session.

use thiserror::Error;
use tracing::debug;

use super::types::{Conversation, Turn};

/// Error type for conversation store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    /// The requested conversation does not exist.
    #[error("conversation index {index} out of range (saved: {len})")]
    OutOfRange {
        /// Requested index or display rank.
        index: usize,
        /// Number of saved conversations.
        len: usize,
    },
}

/// Result type for conversation store operations.
pub type ConversationResult<T> = Result<T, ConversationError>;

/// Saved conversations plus the one currently being extended.
///
/// Saved entries are value snapshots: later changes to the active
/// conversation never reach a copy already in `saved`.
#[derive(Clone, Debug, Default)]
pub struct ConversationStore {
    saved: Vec<Conversation>,
    active: Conversation,
}

impl ConversationStore {
    /// Create a store with no saved conversations and an empty active one.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            saved: Vec::new(),
            active: Conversation::new(),
        }
    }

    /// The conversation currently being extended.
    #[must_use]
    pub const fn active(&self) -> &Conversation {
        &self.active
    }

    /// Number of saved conversations.
    #[must_use]
    pub fn saved_len(&self) -> usize {
        self.saved.len()
    }

    /// Start over with an empty active conversation.
    ///
    /// Turns that were never persisted are dropped.
    pub fn new_conversation(&mut self) {
        if !self.active.is_empty() && !self.saved.contains(&self.active) {
            debug!(
                "Discarding {} unsaved turn(s) from active conversation",
                self.active.len()
            );
        }
        self.active = Conversation::new();
    }

    /// Append a turn to the active conversation.
    ///
    /// The answer is stored as given, empty or not.
    pub fn append_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.active.push(Turn::new(question, answer));
    }

    /// Save a copy of the active conversation unless an equal one is already saved.
    ///
    /// Returns `true` when a new entry was added.
    pub fn persist_if_new(&mut self) -> bool {
        if self.saved.contains(&self.active) {
            return false;
        }

        self.saved.push(self.active.clone());
        debug!("Saved conversation #{}", self.saved.len() - 1);
        true
    }

    /// Make a copy of `saved[index]` the active conversation.
    ///
    /// # Errors
    /// Returns `ConversationError::OutOfRange` if `index` is not a saved position.
    pub fn select_conversation(&mut self, index: usize) -> ConversationResult<()> {
        let selected = self
            .saved
            .get(index)
            .ok_or(ConversationError::OutOfRange {
                index,
                len: self.saved.len(),
            })?;

        self.active = selected.clone();
        Ok(())
    }

    /// Saved conversations, oldest first.
    ///
    /// Use `.rev()` for most-recent-first display.
    pub fn list_saved(&self) -> std::slice::Iter<'_, Conversation> {
        self.saved.iter()
    }

    /// Map a most-recent-first display rank (0 = newest) to a saved index.
    ///
    /// # Errors
    /// Returns `ConversationError::OutOfRange` if `rank` is past the oldest entry.
    pub fn index_for_display_rank(&self, rank: usize) -> ConversationResult<usize> {
        let len = self.saved.len();
        if rank < len {
            Ok(len - 1 - rank)
        } else {
            Err(ConversationError::OutOfRange { index: rank, len })
        }
    }
}
