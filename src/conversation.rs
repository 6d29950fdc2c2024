//! Append-only conversation types.
//!
//! A [`Conversation`] is an ordered sequence of role-tagged turns. It is
//! never mutated in place by a stage: stages return a delta (`Vec<Turn>`)
//! and the orchestrator owns concatenation.

use serde::{Deserialize, Serialize};

/// The role of a conversation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// User/human input (or orchestrator-constructed prompts)
    User,
    /// Model response
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Role of the turn's author
    pub role: Role,
    /// Text content of the turn
    pub content: String,
}

impl Turn {
    /// Create a new turn.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// An ordered, append-only sequence of turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the turns in order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the conversation has no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a single turn.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append a delta returned by a stage.
    pub fn extend(&mut self, delta: impl IntoIterator<Item = Turn>) {
        self.turns.extend(delta);
    }

    /// Return a copy of this conversation with one extra turn.
    ///
    /// Stages use this to build their prompt without touching the running
    /// conversation owned by the orchestrator.
    pub fn with_turn(&self, turn: Turn) -> Self {
        let mut out = self.clone();
        out.push(turn);
        out
    }

    /// Return a copy of this conversation with a delta appended.
    pub fn with_delta(&self, delta: &[Turn]) -> Self {
        let mut out = self.clone();
        out.extend(delta.iter().cloned());
        out
    }
}

impl From<Vec<Turn>> for Conversation {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}
