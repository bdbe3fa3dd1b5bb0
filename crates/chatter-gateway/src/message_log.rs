use std::sync::{Arc, Mutex, PoisonError};

use chatter_types::models::ChatMessage;

/// In-memory, append-only record of every broadcast message. Lives as long
/// as the process; nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Arc<Mutex<Vec<ChatMessage>>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: ChatMessage) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Every message so far, oldest first.
    pub fn list(&self) -> Vec<ChatMessage> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
