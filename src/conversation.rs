//! Conversation Memory
//!
//! Turn history per session, kept in process memory only.
//! The workflow never mutates it: the session layer takes a
//! `ConversationContext` snapshot before each run and appends the exchange
//! after the run produced its final answer.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Maximum messages to keep per conversation (rolling window)
const MAX_MESSAGES_PER_CONVERSATION: usize = 50;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
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

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
}

impl ConversationTurn {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Read-only view of prior turns handed to a workflow run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationContext {
    turns: Vec<ConversationTurn>,
}

impl ConversationContext {
    pub fn new(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent user message
    pub fn last_user_turn(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.role == Role::User)
    }

    /// Render the last `max_turns` turns as prompt context
    pub fn render(&self, max_turns: usize) -> String {
        let skip = self.turns.len().saturating_sub(max_turns);
        self.turns
            .iter()
            .skip(skip)
            .map(|t| format!("{}: {}", t.role.as_str(), t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Per-session turn store owned by the session layer
pub struct ConversationMemory {
    sessions: RwLock<HashMap<String, Vec<ConversationTurn>>>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::with_limit(MAX_MESSAGES_PER_CONVERSATION)
    }

    /// Create with a custom rolling-window size
    pub fn with_limit(max_messages: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_messages: max_messages.max(2),
        }
    }

    /// Append a completed exchange (user question + assistant answer)
    pub fn add_exchange(&self, session: &str, question: &str, answer: &str) {
        let mut sessions = self.sessions.write();
        let turns = sessions.entry(session.to_string()).or_default();
        turns.push(ConversationTurn::new(Role::User, question));
        turns.push(ConversationTurn::new(Role::Assistant, answer));

        if turns.len() > self.max_messages {
            let excess = turns.len() - self.max_messages;
            turns.drain(..excess);
        }

        debug!("Added exchange to session {} ({} turns)", session, turns.len());
    }

    /// Snapshot for the next run
    pub fn context(&self, session: &str) -> ConversationContext {
        let sessions = self.sessions.read();
        ConversationContext::new(sessions.get(session).cloned().unwrap_or_default())
    }

    pub fn turn_count(&self, session: &str) -> usize {
        self.sessions.read().get(session).map_or(0, |t| t.len())
    }

    /// Forget one session
    pub fn clear(&self, session: &str) -> bool {
        self.sessions.write().remove(session).is_some()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}
