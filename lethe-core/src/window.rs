//! Per-Session Context Window

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::config::WindowConfig;
use crate::error::{LetheError, Result};
use crate::message::{IncomingMessage, Message, Summary};

/// Point-in-time usage statistics for a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    /// Current token total across messages and summaries
    pub total_tokens: usize,
    /// Configured token ceiling
    pub max_tokens: usize,
    /// Number of live messages
    pub message_count: usize,
    /// Number of summaries
    pub summary_count: usize,
    /// Budget utilization, 0..=100
    pub utilization_percentage: f64,
}

/// Token-budgeted collection of messages and summaries for one session.
///
/// Sequence indices are monotonic and never reused; summaries are parallel
/// to the message sequence and append-only. `total_tokens` is the sum of all
/// message and summary token counts, re-derived after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindow {
    /// Unique window ID
    pub id: Uuid,
    /// Owning session (unique, 1:1)
    pub session_id: String,
    /// Configuration snapshot taken at creation
    pub config: WindowConfig,
    /// Current token total
    pub total_tokens: usize,
    /// Messages ordered by sequence index
    pub messages: Vec<Message>,
    /// Summaries, parallel to the message sequence
    pub summaries: Vec<Summary>,
    /// Next sequence index to hand out
    next_sequence: u64,
    /// When the window was created
    pub created_at: DateTime<Utc>,
    /// Last mutation or read through the store
    pub last_accessed_at: DateTime<Utc>,
    /// Set by the reaper once the window has been evicted from the store
    #[serde(skip)]
    pub(crate) evicted: bool,
}

impl ContextWindow {
    /// Create an empty window for a session
    pub fn new(session_id: impl Into<String>, config: WindowConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            config,
            total_tokens: 0,
            messages: Vec::new(),
            summaries: Vec::new(),
            next_sequence: 0,
            created_at: now,
            last_accessed_at: now,
            evicted: false,
        }
    }

    /// Admit an incoming message at the next sequence index
    pub fn push_message(&mut self, incoming: IncomingMessage) -> &Message {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let message = Message::admit(incoming, sequence);
        self.total_tokens += message.token_count;
        self.messages.push(message);
        self.debug_assert_accounting();
        self.messages.last().expect("just pushed")
    }

    /// Remove the messages with the given sequence indices.
    ///
    /// Returns the removed messages in sequence order.
    pub fn remove_messages(&mut self, victims: &[u64]) -> Vec<Message> {
        if victims.is_empty() {
            return Vec::new();
        }
        let victim_set: std::collections::HashSet<u64> = victims.iter().copied().collect();
        let mut removed = Vec::with_capacity(victim_set.len());
        self.messages.retain(|m| {
            if victim_set.contains(&m.sequence_index) {
                removed.push(m.clone());
                false
            } else {
                true
            }
        });
        self.recompute_total();
        removed
    }

    /// Append a summary standing in for removed messages
    pub fn push_summary(&mut self, summary: Summary) {
        self.summaries.push(summary);
        self.recompute_total();
    }

    /// Re-derive `total_tokens` from the stored collections
    pub fn recompute_total(&mut self) {
        let messages: usize = self.messages.iter().map(|m| m.token_count).sum();
        let summaries: usize = self.summaries.iter().map(|s| s.token_count).sum();
        self.total_tokens = messages + summaries;
    }

    /// Verify the accounting invariant, healing and logging on drift.
    ///
    /// Drift here means a bug elsewhere; the window recovers by trusting the
    /// stored collections over the running total.
    pub fn check_accounting(&mut self) {
        let messages: usize = self.messages.iter().map(|m| m.token_count).sum();
        let summaries: usize = self.summaries.iter().map(|s| s.token_count).sum();
        let expected = messages + summaries;
        if self.total_tokens != expected {
            error!(
                session_id = %self.session_id,
                stored = self.total_tokens,
                expected,
                "token accounting drift detected, recomputing from collections"
            );
            self.total_tokens = expected;
        }
    }

    /// Record an access for reaper bookkeeping
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
    }

    /// Sequence index the next admitted message will get
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Current usage statistics
    pub fn stats(&self) -> WindowStats {
        let utilization = if self.config.max_tokens == 0 {
            0.0
        } else {
            (self.total_tokens as f64 / self.config.max_tokens as f64) * 100.0
        };
        WindowStats {
            total_tokens: self.total_tokens,
            max_tokens: self.config.max_tokens,
            message_count: self.messages.len(),
            summary_count: self.summaries.len(),
            utilization_percentage: utilization,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON, rejecting payloads whose recorded token total
    /// disagrees with the stored collections.
    pub fn from_json(json: &str) -> Result<Self> {
        let window: Self = serde_json::from_str(json)?;
        let messages: usize = window.messages.iter().map(|m| m.token_count).sum();
        let summaries: usize = window.summaries.iter().map(|s| s.token_count).sum();
        let expected = messages + summaries;
        if window.total_tokens != expected {
            return Err(LetheError::Window(format!(
                "payload for session '{}' records {} tokens but its collections hold {}",
                window.session_id, window.total_tokens, expected
            )));
        }
        Ok(window)
    }

    #[cfg(debug_assertions)]
    fn debug_assert_accounting(&self) {
        let messages: usize = self.messages.iter().map(|m| m.token_count).sum();
        let summaries: usize = self.summaries.iter().map(|s| s.token_count).sum();
        debug_assert_eq!(self.total_tokens, messages + summaries);
    }

    #[cfg(not(debug_assertions))]
    fn debug_assert_accounting(&self) {}
}
