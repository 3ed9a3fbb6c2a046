//! Bounded conversation history handed to the dialogue backend.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// Sliding window over the most recent exchanges. Capped at `pairs`
/// user/assistant pairs; the oldest turns fall off first.
#[derive(Debug)]
pub struct ConversationHistory {
    turns: VecDeque<ChatTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(pairs: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: pairs.saturating_mul(2).max(2),
        }
    }

    pub fn push(&mut self, turn: ChatTurn) {
        while self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> impl Iterator<Item = &ChatTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[cfg(test)]
    fn as_vec(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }
}
