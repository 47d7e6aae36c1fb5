//! Context Assembly Pipeline
//!
//! Orchestrates the staged degradation of an over-budget window:
//! prune → summarize → hard-truncate. Also renders the outward message list
//! consumed by the downstream LLM client, optionally re-trimmed against a
//! smaller caller-supplied ceiling without touching stored state.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::compression::{self, CompressionLevel, SummaryCache};
use crate::message::{Message, MessageRole, Summary};
use crate::pruning::{self, PruningStrategy};
use crate::tokens;
use crate::window::ContextWindow;

/// Marker appended when a system message is cut down as a last resort
const TRUNCATION_MARKER: &str = " [TRUNCATED]";

/// What a compression pass did to a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionStats {
    /// Strategy that ranked the victims
    pub strategy_used: PruningStrategy,
    /// Messages removed, including any hard-ceiling drops
    pub victims_removed: usize,
    /// Summaries appended (0 or 1 per pass)
    pub summaries_created: usize,
    /// Net tokens reclaimed by the pass
    pub tokens_reclaimed: usize,
    /// Whether victims were folded into a summary rather than dropped
    pub compression_applied: bool,
    /// Whether the last-resort truncation path ran; signals a budget too
    /// small for the protected content, never silent
    pub forced_truncation: bool,
}

impl CompressionStats {
    fn idle(strategy: PruningStrategy) -> Self {
        Self {
            strategy_used: strategy,
            victims_removed: 0,
            summaries_created: 0,
            tokens_reclaimed: 0,
            compression_applied: false,
            forced_truncation: false,
        }
    }
}

/// Sequence indices exempt from eviction under the window's config
fn protected_set(window: &ContextWindow) -> HashSet<u64> {
    if window.config.keep_system_messages {
        window
            .messages
            .iter()
            .filter(|m| m.is_system())
            .map(|m| m.sequence_index)
            .collect()
    } else {
        HashSet::new()
    }
}

/// Check the window against its trigger threshold and reclaim if needed.
///
/// Returns `None` when the window is within its threshold and nothing ran.
pub fn enforce_budget(
    window: &mut ContextWindow,
    cache: Option<&mut SummaryCache>,
) -> Option<CompressionStats> {
    window.check_accounting();

    let trigger = window.config.trigger_tokens();
    if window.total_tokens <= trigger {
        return None;
    }
    Some(reclaim(window, cache))
}

/// Run one reclamation pass unconditionally (the forced `compress_context`
/// path). A window already under its threshold yields an idle stats record.
pub fn reclaim(
    window: &mut ContextWindow,
    cache: Option<&mut SummaryCache>,
) -> CompressionStats {
    let strategy = window.config.pruning_strategy;
    let trigger = window.config.trigger_tokens();
    let total_before = window.total_tokens;

    if total_before <= trigger {
        // Within threshold implies within the hard ceiling; forced passes on
        // a compliant window are no-ops.
        return CompressionStats::idle(strategy);
    }

    let excess = total_before - trigger;
    let protected = protected_set(window);
    let ranked = pruning::rank(strategy, &window.messages, &protected);

    // Accumulate ranked victims until they cover the excess
    let mut victims: Vec<u64> = Vec::new();
    let mut reclaimable = 0usize;
    for seq in ranked {
        if reclaimable >= excess {
            break;
        }
        if let Some(m) = window.messages.iter().find(|m| m.sequence_index == seq) {
            reclaimable += m.token_count;
            victims.push(seq);
        }
    }

    let mut stats = CompressionStats::idle(strategy);

    if !victims.is_empty() {
        let removed = window.remove_messages(&victims);
        stats.victims_removed = removed.len();

        let summarize = window.config.summarization_enabled
            && window.config.compression_level != CompressionLevel::None;
        if summarize {
            if let Some(summary) = summarize_victims(&removed, &window.config, cache) {
                // Summaries are append-only and can never be victims, so an
                // append that would breach the hard ceiling is declined and
                // the victims stay deleted outright.
                if window.total_tokens + summary.token_count <= window.config.max_tokens {
                    debug!(
                        session_id = %window.session_id,
                        victims = removed.len(),
                        summary_tokens = summary.token_count,
                        "victims folded into summary"
                    );
                    window.push_summary(summary);
                    stats.summaries_created = 1;
                    stats.compression_applied = true;
                } else {
                    debug!(
                        session_id = %window.session_id,
                        "summary would breach the hard ceiling, victims deleted outright"
                    );
                }
            }
        }
    }

    enforce_hard_ceiling(window, &mut stats);

    window.check_accounting();
    stats.tokens_reclaimed = total_before.saturating_sub(window.total_tokens);
    stats
}

/// Produce a summary for removed victims, consulting the cache when enabled
fn summarize_victims(
    removed: &[Message],
    config: &crate::config::WindowConfig,
    cache: Option<&mut SummaryCache>,
) -> Option<Summary> {
    let range = (
        removed.iter().map(|m| m.sequence_index).min()?,
        removed.iter().map(|m| m.sequence_index).max()?,
    );

    if config.cache_enabled {
        if let Some(cache) = cache {
            let key = compression::victim_set_key(removed);
            if let Some(content) = cache.get(&key) {
                debug!("summary cache hit");
                return Some(Summary::new(range, content));
            }
            let summary = compression::compress(removed, config.compression_level)?;
            cache.insert(key, summary.content.clone());
            return Some(summary);
        }
    }

    compression::compress(removed, config.compression_level)
}

/// Spec'd last resort: the window must never be observable above its hard
/// ceiling. Drops oldest non-system messages first; if protected system
/// content alone exceeds the budget, cuts system messages down with an
/// explicit marker, largest first, until the window fits.
fn enforce_hard_ceiling(window: &mut ContextWindow, stats: &mut CompressionStats) {
    let max = window.config.max_tokens;
    if window.total_tokens <= max {
        return;
    }

    stats.forced_truncation = true;
    warn!(
        session_id = %window.session_id,
        total_tokens = window.total_tokens,
        max_tokens = max,
        "hard ceiling exceeded after reclamation, forcing truncation"
    );

    // Oldest non-system messages go first
    while window.total_tokens > max {
        let oldest_non_system = window
            .messages
            .iter()
            .filter(|m| !m.is_system())
            .map(|m| m.sequence_index)
            .min();
        match oldest_non_system {
            Some(seq) => {
                window.remove_messages(&[seq]);
                stats.victims_removed += 1;
            }
            None => break,
        }
    }

    if window.total_tokens <= max {
        return;
    }

    // Only system messages remain and they still exceed the budget: cut them
    // down largest-first until the window fits. A single cut is not enough
    // when several protected messages each dwarf the budget, so re-check the
    // ceiling after every cut and keep going while cuts still shrink.
    while window.total_tokens > max {
        let largest = window
            .messages
            .iter()
            .enumerate()
            .max_by_key(|(_, m)| m.token_count)
            .map(|(i, _)| i);
        let Some(i) = largest else { break };

        let others = window.total_tokens - window.messages[i].token_count;
        let budget = max.saturating_sub(others);
        let marker_chars = TRUNCATION_MARKER.chars().count();
        let keep_chars = (budget * 4).saturating_sub(marker_chars);
        let kept: String = window.messages[i].content.chars().take(keep_chars).collect();
        let truncated = format!("{}{}", kept.trim_end(), TRUNCATION_MARKER);
        let truncated_tokens = tokens::estimate(&truncated);
        if truncated_tokens >= window.messages[i].token_count {
            // The largest message is already at the marker floor; nothing
            // left to cut.
            break;
        }

        window.messages[i].content = truncated;
        window.messages[i].token_count = truncated_tokens;
        window.recompute_total();
    }

    warn!(
        session_id = %window.session_id,
        total_tokens = window.total_tokens,
        "system messages truncated to fit budget"
    );
}

/// Render the outward message list for a window.
///
/// Summaries appear as synthetic system messages ordered at the start of the
/// span they replace; surviving messages follow in sequence order. When
/// `max_tokens_override` is below the window's own budget, a read-only trim
/// with the window's ranking logic is applied to the rendered copy.
pub fn render_for_api(
    window: &ContextWindow,
    max_tokens_override: Option<usize>,
) -> Vec<Message> {
    // (sequence key, summary-first tiebreak, message)
    let mut entries: Vec<(u64, u8, Message)> = Vec::new();

    for summary in &window.summaries {
        entries.push((summary.replaced_range.0, 0, synthetic_message(summary)));
    }
    for message in &window.messages {
        entries.push((message.sequence_index, 1, message.clone()));
    }
    entries.sort_by_key(|(seq, tie, _)| (*seq, *tie));

    let mut rendered: Vec<Message> = entries.into_iter().map(|(_, _, m)| m).collect();

    if let Some(limit) = max_tokens_override {
        if limit < window.config.max_tokens {
            trim_rendered(&mut rendered, limit, &window.config);
        }
    }
    rendered
}

/// Synthetic system message standing in for a summary in the outward list
fn synthetic_message(summary: &Summary) -> Message {
    Message {
        id: summary.id,
        role: MessageRole::System,
        content: summary.content.clone(),
        importance: 1.0,
        token_count: summary.token_count,
        sequence_index: summary.replaced_range.0,
        created_at: summary.created_at,
    }
}

/// Trim a rendered copy under a caller-supplied ceiling.
///
/// Same ranking logic as the stored pipeline, then the same staged fallback;
/// operates purely on the copy.
fn trim_rendered(rendered: &mut Vec<Message>, limit: usize, config: &crate::config::WindowConfig) {
    let total = |msgs: &[Message]| -> usize { msgs.iter().map(|m| m.token_count).sum() };
    if total(rendered) <= limit {
        return;
    }

    let protected: HashSet<u64> = if config.keep_system_messages {
        rendered
            .iter()
            .filter(|m| m.is_system())
            .map(|m| m.sequence_index)
            .collect()
    } else {
        HashSet::new()
    };

    let excess = total(rendered) - limit;
    let ranked = pruning::rank(config.pruning_strategy, rendered, &protected);

    let mut to_drop: HashSet<u64> = HashSet::new();
    let mut reclaimable = 0usize;
    for seq in ranked {
        if reclaimable >= excess {
            break;
        }
        if let Some(m) = rendered.iter().find(|m| m.sequence_index == seq) {
            reclaimable += m.token_count;
            to_drop.insert(seq);
        }
    }
    rendered.retain(|m| !to_drop.contains(&m.sequence_index));

    // Staged fallback on the copy, mirroring the stored pipeline
    while total(rendered) > limit {
        let oldest_non_system = rendered
            .iter()
            .filter(|m| !m.is_system())
            .map(|m| m.sequence_index)
            .min();
        match oldest_non_system {
            Some(seq) => rendered.retain(|m| m.sequence_index != seq),
            None => break,
        }
    }

    // Largest-first cuts with a re-check after each, matching the stored
    // pipeline's last resort.
    while total(rendered) > limit {
        let Some(i) = rendered
            .iter()
            .enumerate()
            .max_by_key(|(_, m)| m.token_count)
            .map(|(i, _)| i)
        else {
            break;
        };

        let others = total(rendered) - rendered[i].token_count;
        let budget = limit.saturating_sub(others);
        let marker_chars = TRUNCATION_MARKER.chars().count();
        let keep_chars = (budget * 4).saturating_sub(marker_chars);
        let kept: String = rendered[i].content.chars().take(keep_chars).collect();
        let truncated = format!("{}{}", kept.trim_end(), TRUNCATION_MARKER);
        let truncated_tokens = tokens::estimate(&truncated);
        if truncated_tokens >= rendered[i].token_count {
            break;
        }
        rendered[i].content = truncated;
        rendered[i].token_count = truncated_tokens;
    }
}
