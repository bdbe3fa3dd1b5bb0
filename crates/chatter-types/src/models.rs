use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user as exposed outside the store. The password hash never
/// leaves the database layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// One chat line as it passed through the broadcast point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            sent_at: Utc::now(),
        }
    }

    /// Wire form delivered to every recipient: `"{sender}: {text}"`.
    pub fn render(&self) -> String {
        format!("{}: {}", self.sender, self.text)
    }
}
