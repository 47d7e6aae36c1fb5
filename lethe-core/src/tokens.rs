//! Token Cost Estimation
//!
//! A deterministic heuristic (roughly 4 characters per token) prices both
//! incoming messages and candidate summaries, so budget comparisons stay
//! internally consistent without an external tokenizer.

/// Estimate the token cost of a piece of text.
///
/// Monotonic in text length, zero only for empty text. The estimate rounds
/// up so that non-empty content is never admitted for free.
pub fn estimate(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(4)
}
