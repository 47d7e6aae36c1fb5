//! Victim Selection Strategies
//!
//! Pure ranking over a window's message sequence: given a strategy and a set
//! of protected sequence indices, produce the order in which messages should
//! be evicted. Nothing here mutates window state; the assembler decides how
//! many ranked victims it actually needs.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageRole};

/// Words too common to signal topical overlap
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "has", "have",
        "was", "were", "with", "this", "that", "what", "when", "where", "which", "will",
        "would", "there", "their", "about", "from", "they", "them", "then", "than", "your",
        "into", "just", "like", "some", "more", "very", "also", "been", "being", "does",
    ]
    .into_iter()
    .collect()
});

/// How victims are chosen when the window runs over budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PruningStrategy {
    /// Oldest messages first
    Fifo,
    /// Newest messages first
    Lifo,
    /// Least important first (ties broken oldest-first)
    Importance,
    /// Least relevant to the latest user message first
    Relevance,
    /// Even blend of importance and relevance
    Hybrid,
}

impl std::fmt::Display for PruningStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PruningStrategy::Fifo => write!(f, "fifo"),
            PruningStrategy::Lifo => write!(f, "lifo"),
            PruningStrategy::Importance => write!(f, "importance"),
            PruningStrategy::Relevance => write!(f, "relevance"),
            PruningStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Rank eviction candidates for a strategy.
///
/// Returns victim sequence indices in eviction order. Protected indices are
/// never returned. When every eligible message has been ranked the list is
/// simply shorter than the caller hoped; escalation is the caller's problem.
pub fn rank(
    strategy: PruningStrategy,
    messages: &[Message],
    protected: &HashSet<u64>,
) -> Vec<u64> {
    let eligible: Vec<&Message> = messages
        .iter()
        .filter(|m| !protected.contains(&m.sequence_index))
        .collect();

    match strategy {
        PruningStrategy::Fifo => by_sequence(eligible, false),
        PruningStrategy::Lifo => by_sequence(eligible, true),
        PruningStrategy::Importance => {
            by_score(eligible, |m| m.importance)
        }
        PruningStrategy::Relevance => {
            let query = latest_user_terms(messages);
            by_score(eligible, |m| relevance_score(m, &query))
        }
        PruningStrategy::Hybrid => {
            let query = latest_user_terms(messages);
            by_score(eligible, |m| {
                0.5 * m.importance + 0.5 * relevance_score(m, &query)
            })
        }
    }
}

fn by_sequence(mut eligible: Vec<&Message>, descending: bool) -> Vec<u64> {
    eligible.sort_by_key(|m| m.sequence_index);
    if descending {
        eligible.reverse();
    }
    eligible.into_iter().map(|m| m.sequence_index).collect()
}

fn by_score<F: Fn(&Message) -> f64>(mut eligible: Vec<&Message>, score: F) -> Vec<u64> {
    // Ascending score, oldest-first on ties
    eligible.sort_by(|a, b| {
        score(a)
            .total_cmp(&score(b))
            .then(a.sequence_index.cmp(&b.sequence_index))
    });
    eligible.into_iter().map(|m| m.sequence_index).collect()
}

/// Significant terms of the most recent user message, if any
fn latest_user_terms(messages: &[Message]) -> HashSet<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| significant_terms(&m.content))
        .unwrap_or_default()
}

/// Fraction of a message's significant terms shared with the query terms
fn relevance_score(message: &Message, query: &HashSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let terms = significant_terms(&message.content);
    if terms.is_empty() {
        return 0.0;
    }
    let shared = terms.iter().filter(|t| query.contains(*t)).count();
    shared as f64 / terms.len() as f64
}

fn significant_terms(content: &str) -> HashSet<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IncomingMessage;

    fn msg(role: MessageRole, content: &str, importance: f64, seq: u64) -> Message {
        Message::admit(
            IncomingMessage::new(role, content).with_importance(importance),
            seq,
        )
    }

    fn user_msgs(count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| msg(MessageRole::User, &format!("message {}", i), 0.5, i as u64))
            .collect()
    }

    #[test]
    fn test_fifo_oldest_first() {
        let messages = user_msgs(4);
        let victims = rank(PruningStrategy::Fifo, &messages, &HashSet::new());
        assert_eq!(victims, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_lifo_newest_first() {
        let messages = user_msgs(4);
        let victims = rank(PruningStrategy::Lifo, &messages, &HashSet::new());
        assert_eq!(victims, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_importance_lowest_first() {
        let messages = vec![
            msg(MessageRole::User, "keep me", 1.0, 0),
            msg(MessageRole::User, "drop me", 0.1, 1),
            msg(MessageRole::User, "middle", 0.5, 2),
        ];
        let victims = rank(PruningStrategy::Importance, &messages, &HashSet::new());
        assert_eq!(victims, vec![1, 2, 0]);
    }

    #[test]
    fn test_importance_ties_break_oldest_first() {
        let messages = vec![
            msg(MessageRole::User, "first", 0.5, 0),
            msg(MessageRole::User, "second", 0.5, 1),
        ];
        let victims = rank(PruningStrategy::Importance, &messages, &HashSet::new());
        assert_eq!(victims, vec![0, 1]);
    }

    #[test]
    fn test_protected_never_ranked() {
        let messages = vec![
            msg(MessageRole::System, "rules", 0.5, 0),
            msg(MessageRole::User, "hello", 0.5, 1),
        ];
        let protected: HashSet<u64> = [0].into_iter().collect();

        for strategy in [
            PruningStrategy::Fifo,
            PruningStrategy::Lifo,
            PruningStrategy::Importance,
            PruningStrategy::Relevance,
            PruningStrategy::Hybrid,
        ] {
            let victims = rank(strategy, &messages, &protected);
            assert!(!victims.contains(&0), "{} ranked a protected index", strategy);
        }
    }

    #[test]
    fn test_relevance_prefers_evicting_off_topic() {
        let messages = vec![
            msg(MessageRole::User, "rust borrow checker lifetimes", 0.5, 0),
            msg(MessageRole::User, "favorite pizza toppings tonight", 0.5, 1),
            msg(MessageRole::User, "explain rust lifetimes again", 0.5, 2),
        ];
        let victims = rank(PruningStrategy::Relevance, &messages, &HashSet::new());
        // The pizza message shares nothing with the latest user query
        assert_eq!(victims[0], 1);
    }

    #[test]
    fn test_hybrid_blends_importance_and_relevance() {
        let messages = vec![
            // Irrelevant but maximally important
            msg(MessageRole::User, "grocery list bananas milk", 1.0, 0),
            // Relevant but unimportant
            msg(MessageRole::User, "rust lifetimes borrow", 0.0, 1),
            msg(MessageRole::User, "rust lifetimes question", 0.5, 2),
        ];
        let victims = rank(PruningStrategy::Hybrid, &messages, &HashSet::new());
        // 0: 0.5*1.0 + 0 = 0.5; 1: 0 + 0.5*(2/3) ≈ 0.33 → message 1 goes first
        assert_eq!(victims[0], 1);
    }

    #[test]
    fn test_rank_never_mutates() {
        let messages = user_msgs(3);
        let before: Vec<u64> = messages.iter().map(|m| m.sequence_index).collect();
        rank(PruningStrategy::Lifo, &messages, &HashSet::new());
        let after: Vec<u64> = messages.iter().map(|m| m.sequence_index).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_messages() {
        let victims = rank(PruningStrategy::Fifo, &[], &HashSet::new());
        assert!(victims.is_empty());
    }
}
