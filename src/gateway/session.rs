//! Bounded per-session conversation memory.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire representation for the upstream `messages` array.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// In-memory store of per-session turn histories.
///
/// Each history is bounded to `max_turns`; appending past the bound evicts
/// the oldest turns (FIFO). The DashMap entry API serializes writers for
/// the same session key, so concurrent appends cannot interleave turns or
/// overshoot the bound. Sessions are never evicted; process-local state is
/// lost on restart.
pub struct SessionStore {
    sessions: DashMap<String, Vec<Turn>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns,
        }
    }

    /// Snapshot the history for a session key. Unseen keys yield empty.
    pub fn load(&self, session_key: &str) -> Vec<Turn> {
        self.sessions
            .get(session_key)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Append one completed exchange, then truncate from the front.
    pub fn append(&self, session_key: &str, user: Turn, assistant: Turn) {
        let mut entry = self.sessions.entry(session_key.to_string()).or_default();
        entry.push(user);
        entry.push(assistant);
        let len = entry.len();
        if len > self.max_turns {
            entry.drain(..len - self.max_turns);
        }
    }

    /// Number of distinct sessions seen so far.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
