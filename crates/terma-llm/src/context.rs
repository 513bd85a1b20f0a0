use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Conversation messages retained per session, beyond the system message.
pub const MAX_CONTEXT_MESSAGES: usize = 10;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a terminal assistant that helps users with \
    command-line tasks. Provide concise explanations and suggestions for terminal commands. \
    Focus on being helpful, accurate, and security-conscious.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Session-keyed conversation history: one system message plus the
/// [`MAX_CONTEXT_MESSAGES`] most recent turns. In-memory only.
pub struct ContextStore {
    system_prompt: String,
    contexts: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl ContextStore {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    fn fresh_context(&self) -> Vec<ChatMessage> {
        vec![ChatMessage::new(Role::System, self.system_prompt.clone())]
    }

    /// Snapshot the session's context, creating it on first use.
    pub fn context(&self, session_id: &str) -> Vec<ChatMessage> {
        let mut contexts = self.contexts.lock().unwrap();
        contexts
            .entry(session_id.to_string())
            .or_insert_with(|| self.fresh_context())
            .clone()
    }

    /// Append a turn, evicting the oldest non-system turns beyond the cap.
    pub fn push(&self, session_id: &str, role: Role, content: impl Into<String>) {
        let mut contexts = self.contexts.lock().unwrap();
        let context = contexts
            .entry(session_id.to_string())
            .or_insert_with(|| self.fresh_context());
        context.push(ChatMessage::new(role, content));

        if context.len() > MAX_CONTEXT_MESSAGES + 1 {
            let excess = context.len() - (MAX_CONTEXT_MESSAGES + 1);
            context.drain(1..1 + excess);
        }
    }

    /// Reset a session's context to the system message alone.
    pub fn clear(&self, session_id: &str) {
        let mut contexts = self.contexts.lock().unwrap();
        if let Some(context) = contexts.get_mut(session_id) {
            context.truncate(1);
        }
    }

    /// Drop a session's context entirely (on session close).
    pub fn remove(&self, session_id: &str) {
        self.contexts.lock().unwrap().remove(session_id);
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.contexts
            .lock()
            .unwrap()
            .get(session_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_starts_with_system_message() {
        let store = ContextStore::new("sys");
        let context = store.context("s1");
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].role, Role::System);
        assert_eq!(context[0].content, "sys");
    }

    #[test]
    fn context_trims_to_system_plus_cap() {
        let store = ContextStore::new("sys");
        for i in 0..12 {
            store.push("s1", Role::User, format!("question {i}"));
            store.push("s1", Role::Assistant, format!("answer {i}"));
        }

        let context = store.context("s1");
        assert_eq!(context.len(), 1 + MAX_CONTEXT_MESSAGES);
        assert_eq!(context[0].role, Role::System);
        // The most recent turns survive.
        assert_eq!(context.last().unwrap().content, "answer 11");
        assert_eq!(context[1].content, "answer 6");
    }

    #[test]
    fn clear_keeps_only_system_message() {
        let store = ContextStore::new("sys");
        store.push("s1", Role::User, "hello");
        store.push("s1", Role::Assistant, "hi");

        store.clear("s1");
        let context = store.context("s1");
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].role, Role::System);
    }

    #[test]
    fn remove_drops_the_session() {
        let store = ContextStore::new("sys");
        store.push("s1", Role::User, "hello");
        store.remove("s1");
        assert_eq!(store.len("s1"), 0);
    }

    #[test]
    fn sessions_are_isolated() {
        let store = ContextStore::new("sys");
        store.push("a", Role::User, "for a");
        store.push("b", Role::User, "for b");

        assert_eq!(store.context("a")[1].content, "for a");
        assert_eq!(store.context("b")[1].content, "for b");
    }
}
