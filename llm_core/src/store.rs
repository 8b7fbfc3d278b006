use std::collections::HashMap;
use std::sync::RwLock;

use crate::ChatMessage;

/// Conversation history keyed by session id.
pub trait MessageStore: Send + Sync {
    /// Messages recorded for the session, oldest first. Unknown sessions are
    /// empty, not errors.
    fn messages(&self, session_id: &str) -> Vec<ChatMessage>;

    /// Append one message to the session, creating it if needed.
    fn append(&self, session_id: &str, message: ChatMessage);

    /// Drop the session and everything in it.
    fn clear(&self, session_id: &str);
}

/// Process-local store. History lives only as long as the server does.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn messages(&self, session_id: &str) -> Vec<ChatMessage> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    fn append(&self, session_id: &str, message: ChatMessage) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(message);
    }

    fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }
}
