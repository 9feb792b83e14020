//! Types for conversation history.

use serde::{Deserialize, Serialize};

/// Title shown for a conversation that has no turns yet.
const EMPTY_TITLE: &str = "New conversation";

/// Maximum title length in characters.
const MAX_TITLE_CHARS: usize = 50;

/// One question/answer exchange.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Turn {
    question: String,
    answer: String,
}

impl Turn {
    /// Create a turn from a question and the answer it received.
    #[must_use]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// The question as typed by the user.
    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    /// The answer returned for the question.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }
}

/// Ordered turns of a single dialogue, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Create an empty conversation.
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Append a turn at the end.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// All turns in chronological order.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The latest turn, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the conversation has no turns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Short label for history listings, derived from the first question.
    #[must_use]
    pub fn title(&self) -> String {
        let Some(first) = self.turns.first() else {
            return EMPTY_TITLE.to_string();
        };

        let question = first.question().trim();
        if question.chars().count() <= MAX_TITLE_CHARS {
            return question.to_string();
        }

        let mut title: String = question.chars().take(MAX_TITLE_CHARS).collect();
        title.push('…');
        title
    }
}

impl FromIterator<Turn> for Conversation {
    fn from_iter<I: IntoIterator<Item = Turn>>(iter: I) -> Self {
        Self {
            turns: iter.into_iter().collect(),
        }
    }
}
