use super::client::{Message, Role};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Session-scoped conversation memory, shared by handle between the
/// orchestrator and anything else that needs to read or reset it.
pub type SharedContext = Arc<Mutex<ConversationContext>>;

#[derive(Debug, Clone)]
pub struct ConversationContext {
    messages: Vec<Message>,
    max_history: usize,
}

impl ConversationContext {
    /// Create a new conversation context keeping at most `max_history` non-system messages
    pub fn new(max_history: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_history,
        }
    }

    /// Create with the default history limit (10 non-system messages)
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }

    /// Wrap into a shareable handle
    pub fn shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.add_message(Message::user(content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.add_message(Message::assistant(content));
    }

    /// Insert the session system message unless one is already present.
    /// Returns true when the message was inserted.
    pub fn add_personalised_system_message(&mut self, content: impl Into<String>) -> bool {
        if self.has_system_message() {
            log::debug!("Context: system message already present, keeping the first one");
            return false;
        }

        self.messages.insert(0, Message::system(content));
        true
    }

    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(Message::is_system)
    }

    fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.prune();
    }

    /// Snapshot of the history, oldest first
    pub fn get_messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Drop every non-system message
    pub fn clear_context(&mut self) {
        self.messages.retain(Message::is_system);
    }

    /// Number of non-system messages
    pub fn len(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_system()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Evict the oldest non-system messages beyond the limit. When anything is
    /// evicted, system messages are moved ahead of the survivors.
    fn prune(&mut self) {
        let count = self.len();
        if count <= self.max_history {
            return;
        }

        let excess = count - self.max_history;
        let (system, rest): (Vec<Message>, Vec<Message>) =
            self.messages.drain(..).partition(Message::is_system);

        self.messages = system;
        self.messages.extend(rest.into_iter().skip(excess));

        log::debug!("Context: evicted {} old message(s)", excess);
    }

    /// Get context summary for debugging
    pub fn summary(&self) -> String {
        let users = self
            .messages
            .iter()
            .filter(|m| m.role() == Role::User)
            .count();
        let assistants = self
            .messages
            .iter()
            .filter(|m| m.role() == Role::Assistant)
            .count();

        format!(
            "Context: {} messages ({} user, {} assistant, system: {}) (limit: {} messages)",
            self.len(),
            users,
            assistants,
            if self.has_system_message() { "yes" } else { "no" },
            self.max_history
        )
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::with_defaults()
    }
}
