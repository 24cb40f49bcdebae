//! Bounded conversation history
//!
//! Each session owns one [`ConversationBuffer`]. Entries are kept in
//! insertion order and the oldest ones are evicted first once the buffer
//! grows past its capacity.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Persona instruction
    System,
    /// The human in the voice channel
    User,
    /// Yui
    Assistant,
}

/// A single chat message, in the shape completion APIs expect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it
    pub role: Role,

    /// What was said
    pub content: String,
}

impl ChatMessage {
    /// Create a message
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// FIFO log of recent turns, capped at a fixed number of entries
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    entries: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ConversationBuffer {
    /// Create an empty buffer holding at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 2),
            capacity,
        }
    }

    /// Append an entry at the end
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.entries.push_back(ChatMessage::new(role, content));
    }

    /// Drop oldest entries until at most `capacity` remain
    pub fn trim(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }

    /// Trim to the buffer's own capacity
    pub fn trim_to_capacity(&mut self) {
        self.trim(self.capacity);
    }

    /// Ordered copy of the entries
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }

    /// Iterate entries oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
