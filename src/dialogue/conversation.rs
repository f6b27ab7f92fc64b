//! In-memory conversation history with a sliding window.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// How an assistant turn came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Complete,
    /// Cut short by the user speaking. Holds the text generated so far.
    Interrupted,
    /// Generation failed; holds the apology that was spoken instead.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub status: TurnStatus,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            status: TurnStatus::Complete,
        }
    }

    pub fn assistant(content: impl Into<String>, status: TurnStatus) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            status,
        }
    }
}

/// Ordered user/assistant turns, committed one exchange at a time.
///
/// Turns are only ever appended in user/assistant pairs, so the oldest pair
/// can be evicted without leaving the window starting on an assistant turn.
#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: Vec<Turn>,
    max_turns: usize,
    total_appended: u64,
    /// Model-written digest of turns removed by [`ConversationState::compact`].
    summary: Option<String>,
}

impl ConversationState {
    /// `max_turns` is rounded down to an even number, minimum one pair.
    pub fn new(max_turns: usize) -> Self {
        let max_turns = (max_turns - max_turns % 2).max(2);
        Self {
            turns: Vec::new(),
            max_turns,
            total_appended: 0,
            summary: None,
        }
    }

    /// Turns currently in the window, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Turns appended over the whole session, evicted ones included.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Append one exchange.
    pub fn commit(&mut self, user: impl Into<String>, assistant: impl Into<String>, status: TurnStatus) {
        self.turns.push(Turn::user(user));
        self.turns.push(Turn::assistant(assistant, status));
        self.total_appended += 2;

        while self.turns.len() > self.max_turns {
            self.turns.drain(..2);
        }
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Drop every turn in the window and keep `summary` in their place.
    /// A new summary replaces the old one, which it is expected to cover.
    pub fn compact(&mut self, summary: impl Into<String>) {
        self.turns.clear();
        self.summary = Some(summary.into());
    }
}
