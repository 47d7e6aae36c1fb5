//! Message and Summary Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tokens;

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction
    System,
    /// End-user message
    User,
    /// Assistant response
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Inbound message shape, as validated and marshaled by the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Author role
    pub role: MessageRole,
    /// Message text (transport guarantees non-empty)
    pub content: String,
    /// Optional importance in [0, 1]; defaults to 0.5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
}

impl IncomingMessage {
    /// Create a new incoming message with default importance
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            importance: None,
        }
    }

    /// Set the importance (clamped to [0, 1] at admission)
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }
}

/// A message held inside a context window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: Uuid,
    /// Author role
    pub role: MessageRole,
    /// Message text
    pub content: String,
    /// Importance in [0, 1]; higher is kept longer by importance pruning
    pub importance: f64,
    /// Token cost, derived at admission
    pub token_count: usize,
    /// Position in the window; monotonic, never reused
    pub sequence_index: u64,
    /// When the message was admitted
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Admit an incoming message at a given sequence index.
    ///
    /// Derives the token cost and clamps importance into [0, 1].
    pub fn admit(incoming: IncomingMessage, sequence_index: u64) -> Self {
        let token_count = tokens::estimate(&incoming.content);
        Self {
            id: Uuid::new_v4(),
            role: incoming.role,
            content: incoming.content,
            importance: incoming.importance.unwrap_or(0.5).clamp(0.0, 1.0),
            token_count,
            sequence_index,
            created_at: Utc::now(),
        }
    }

    /// Whether this is a system-role message
    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }
}

/// A synthetic digest standing in for a removed span of messages.
///
/// Summaries live in a list parallel to the message sequence; they are only
/// appended, never individually removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// Unique summary ID
    pub id: Uuid,
    /// Inclusive sequence-index span this summary stands in for
    pub replaced_range: (u64, u64),
    /// Digest text
    pub content: String,
    /// Token cost of the digest
    pub token_count: usize,
    /// When the summary was created
    pub created_at: DateTime<Utc>,
}

impl Summary {
    /// Create a summary for a replaced span, pricing its content
    pub fn new(replaced_range: (u64, u64), content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = tokens::estimate(&content);
        Self {
            id: Uuid::new_v4(),
            replaced_range,
            content,
            token_count,
            created_at: Utc::now(),
        }
    }
}
