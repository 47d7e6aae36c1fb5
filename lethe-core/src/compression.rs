//! Summary Generation and Caching
//!
//! Replaces a set of victim messages with a smaller synthetic summary, graded
//! by compression level. The shrink guarantee is absolute: a produced summary
//! always costs strictly fewer tokens than the victims it replaces, otherwise
//! compression is declined and plain deletion applies.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::message::{Message, MessageRole, Summary};
use crate::tokens;

/// Token budget for light-level extracts
const LIGHT_SUMMARY_BUDGET: usize = 64;

/// Victim sets cheaper than this are deleted rather than summarized
const MIN_VIABLE_VICTIM_TOKENS: usize = 16;

/// How aggressively victim content is condensed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Never summarize; prune outright
    None,
    /// First-sentence extracts, capped to a small budget
    Light,
    /// Half-length truncation of concatenated content
    Moderate,
    /// Count and role distribution only
    Aggressive,
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionLevel::None => write!(f, "none"),
            CompressionLevel::Light => write!(f, "light"),
            CompressionLevel::Moderate => write!(f, "moderate"),
            CompressionLevel::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Build a summary for a victim set, or decline.
///
/// Returns `None` when the level is `None`, the victim set is empty, the set
/// is below the minimum viable size, or the candidate digest would not be
/// strictly cheaper than the victims it replaces. Callers fall back to
/// ordinary deletion in every declined case.
pub fn compress(victims: &[Message], level: CompressionLevel) -> Option<Summary> {
    if victims.is_empty() || level == CompressionLevel::None {
        return None;
    }

    let victim_tokens: usize = victims.iter().map(|m| m.token_count).sum();
    if victim_tokens < MIN_VIABLE_VICTIM_TOKENS {
        debug!(
            victim_tokens,
            "victim set below viable summary size, deleting instead"
        );
        return None;
    }

    let content = match level {
        CompressionLevel::None => unreachable!(),
        CompressionLevel::Light => light_extract(victims),
        CompressionLevel::Moderate => moderate_truncate(victims),
        CompressionLevel::Aggressive => aggressive_digest(victims),
    };

    if tokens::estimate(&content) >= victim_tokens {
        debug!("candidate summary not cheaper than victims, deleting instead");
        return None;
    }

    let range = replaced_range(victims);
    Some(Summary::new(range, content))
}

/// Inclusive sequence-index span covered by a victim set
fn replaced_range(victims: &[Message]) -> (u64, u64) {
    let first = victims.iter().map(|m| m.sequence_index).min().unwrap_or(0);
    let last = victims.iter().map(|m| m.sequence_index).max().unwrap_or(0);
    (first, last)
}

/// First sentence of each victim, joined and capped to a fixed token budget
fn light_extract(victims: &[Message]) -> String {
    let extracts: Vec<&str> = victims.iter().map(|m| first_sentence(&m.content)).collect();
    let joined = extracts.join(" ");
    cap_to_tokens(&joined, LIGHT_SUMMARY_BUDGET)
}

/// Concatenated content truncated to roughly half its characters
fn moderate_truncate(victims: &[Message]) -> String {
    let joined: String = victims
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let keep = joined.chars().count() / 2;
    let truncated: String = joined.chars().take(keep).collect();
    format!("{} … [compressed]", truncated.trim_end())
}

/// Digest stating only how many messages of each role were folded away
fn aggressive_digest(victims: &[Message]) -> String {
    let mut system = 0usize;
    let mut user = 0usize;
    let mut assistant = 0usize;
    for m in victims {
        match m.role {
            MessageRole::System => system += 1,
            MessageRole::User => user += 1,
            MessageRole::Assistant => assistant += 1,
        }
    }
    format!(
        "[{} earlier messages condensed: {} system, {} user, {} assistant]",
        victims.len(),
        system,
        user,
        assistant
    )
}

fn first_sentence(content: &str) -> &str {
    let end = content
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8());
    match end {
        Some(i) => &content[..i],
        None => content,
    }
}

fn cap_to_tokens(text: &str, budget: usize) -> String {
    // 4 chars per token, same pricing as the accountant
    let max_chars = budget * 4;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(2)).collect();
    format!("{}…", kept.trim_end())
}

/// Content-hash key over a victim set.
///
/// Two victim sets with identical ids and content hash identically, so a
/// repeated compression of the same span hits the cache.
pub fn victim_set_key(victims: &[Message]) -> String {
    let mut hasher = Sha256::new();
    for m in victims {
        hasher.update(m.id.as_bytes());
        hasher.update(m.content.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// A cached digest body, reusable across windows
#[derive(Debug, Clone)]
struct CachedDigest {
    content: String,
}

/// Fixed-capacity LRU cache of summary bodies keyed by victim-set hash.
///
/// Bounded independently of session count; window storage never holds a
/// reference into it.
#[derive(Debug)]
pub struct SummaryCache {
    capacity: usize,
    entries: HashMap<String, CachedDigest>,
    recency: VecDeque<String>,
}

impl SummaryCache {
    /// Create a cache holding at most `capacity` digests
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    /// Look up a digest body, refreshing its recency on hit
    pub fn get(&mut self, key: &str) -> Option<String> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get(key).map(|d| d.content.clone())
    }

    /// Insert a digest body, evicting the least recently used on overflow
    pub fn insert(&mut self, key: String, content: String) {
        if self.entries.contains_key(&key) {
            self.touch(&key);
            self.entries.insert(key, CachedDigest { content });
            return;
        }
        while self.entries.len() >= self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
        self.recency.push_back(key.clone());
        self.entries.insert(key, CachedDigest { content });
    }

    /// Number of cached digests
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
            self.recency.push_back(key.to_string());
        }
    }
}
