//! End-to-end scenarios exercising the full admission → pruning →
//! summarization pipeline through the public store surface.

use anyhow::Context;
use lethe_core::prelude::*;

/// Content priced at roughly `tokens` by the accountant (4 chars per token)
fn filler(tokens: usize) -> String {
    "x".repeat(tokens * 4)
}

fn user(content: impl Into<String>) -> IncomingMessage {
    IncomingMessage::new(MessageRole::User, content.into())
}

fn small_window(strategy: PruningStrategy) -> WindowConfig {
    WindowConfig::new()
        .with_max_tokens(1_000)
        .with_compression_threshold(0.8)
        .with_pruning_strategy(strategy)
        .with_summarization_enabled(false)
}

fn store() -> SessionWindowStore {
    SessionWindowStore::new(&LetheConfig::default())
}

#[tokio::test]
async fn fifo_eviction_keeps_the_tail_under_budget() -> anyhow::Result<()> {
    // Scenario: 1000-token budget, 0.8 threshold, fifo, summarization off;
    // twenty ~100-token messages must leave only the recent tail standing.
    let store = store();
    let config = small_window(PruningStrategy::Fifo);

    for i in 0..20 {
        let outcome = store
            .add_message("a", user(filler(100)), Some(config.clone()))
            .await;
        assert!(
            outcome.window.total_tokens <= 1_000,
            "ceiling breached after message {i}: {}",
            outcome.window.total_tokens
        );
    }

    let messages = store.get_context_for_api("a", None).await;
    assert!(!messages.is_empty());

    // Only a recent tail survives, in order
    let first_surviving = messages.first().context("no survivors")?.sequence_index;
    assert!(first_surviving > 0, "earliest messages should be evicted");
    let indices: Vec<u64> = messages.iter().map(|m| m.sequence_index).collect();
    let mut sorted = indices.clone();
    sorted.sort_unstable();
    assert_eq!(indices, sorted, "relative ordering must be preserved");

    let total: usize = messages.iter().map(|m| m.token_count).sum();
    assert!(total <= 1_000);
    Ok(())
}

#[tokio::test]
async fn importance_evicts_the_low_importance_message_first() -> anyhow::Result<()> {
    // Scenario: same budget, importance strategy; the 0.1 message goes
    // before the 1.0 message.
    let store = store();
    let config = small_window(PruningStrategy::Importance);

    store
        .add_message(
            "b",
            user(filler(300)).with_importance(1.0),
            Some(config.clone()),
        )
        .await;
    store
        .add_message(
            "b",
            user(filler(300)).with_importance(0.1),
            Some(config.clone()),
        )
        .await;

    // Push past the 800-token trigger
    let outcome = store
        .add_message("b", user(filler(300)).with_importance(0.9), Some(config))
        .await;

    let stats = outcome.stats.context("pipeline should have run")?;
    assert!(stats.victims_removed >= 1);

    let survivors = store.get_context_for_api("b", None).await;
    assert!(
        survivors.iter().any(|m| (m.importance - 1.0).abs() < f64::EPSILON),
        "the 1.0-importance message must survive"
    );
    assert!(
        !survivors.iter().any(|m| (m.importance - 0.1).abs() < f64::EPSILON),
        "the 0.1-importance message must be evicted first"
    );
    Ok(())
}

#[tokio::test]
async fn protected_system_message_survives_eviction() {
    // Scenario: keep_system_messages on, one 50-token system message, user
    // fill until eviction triggers; the system message survives.
    let store = store();
    let config = small_window(PruningStrategy::Fifo).with_keep_system_messages(true);

    store
        .add_message(
            "c",
            IncomingMessage::new(MessageRole::System, filler(50)),
            Some(config.clone()),
        )
        .await;

    for _ in 0..15 {
        let outcome = store
            .add_message("c", user(filler(100)), Some(config.clone()))
            .await;
        assert!(outcome.window.total_tokens <= 1_000);
    }

    let messages = store.get_context_for_api("c", None).await;
    assert!(
        messages.iter().any(|m| m.role == MessageRole::System),
        "protected system message must survive the fill"
    );
}

#[tokio::test]
async fn ceiling_holds_when_protected_system_content_exceeds_budget() -> anyhow::Result<()> {
    // Several protected system messages that together dwarf the budget; every
    // call must still hand back a window at or under the ceiling, with the
    // protected messages cut down rather than dropped.
    let store = store();
    let config = small_window(PruningStrategy::Fifo).with_keep_system_messages(true);

    for i in 0..3 {
        let outcome = store
            .add_message(
                "sys",
                IncomingMessage::new(MessageRole::System, filler(600)),
                Some(config.clone()),
            )
            .await;
        assert!(
            outcome.window.total_tokens <= 1_000,
            "ceiling breached after system message {i}: {}",
            outcome.window.total_tokens
        );
    }

    let stats = store
        .get_window_stats("sys")
        .await
        .context("window missing")?;
    assert!(stats.total_tokens <= stats.max_tokens);
    assert_eq!(stats.message_count, 3);
    Ok(())
}

#[tokio::test]
async fn moderate_summarization_shrinks_and_appends_one_summary() -> anyhow::Result<()> {
    // Scenario: summarization on at moderate level; evicted victims fold
    // into exactly one summary strictly cheaper than what it replaced.
    let store = store();
    let config = small_window(PruningStrategy::Fifo)
        .with_summarization_enabled(true)
        .with_compression_level(CompressionLevel::Moderate);

    let mut last = None;
    for _ in 0..9 {
        last = Some(
            store
                .add_message("d", user(filler(100)), Some(config.clone()))
                .await,
        );
    }
    let outcome = last.context("loop ran")?;
    let stats = outcome.stats.context("pipeline should have run")?;
    assert!(stats.compression_applied);
    assert_eq!(stats.summaries_created, 1);
    assert_eq!(outcome.window.summaries.len(), 1);

    let summary = &outcome.window.summaries[0];
    let victim_tokens = stats.tokens_reclaimed + summary.token_count;
    assert!(
        summary.token_count < victim_tokens,
        "summary must be strictly cheaper than its victims"
    );
    assert!(outcome.window.total_tokens <= 1_000);
    Ok(())
}

#[tokio::test]
async fn absent_sessions_are_steady_state() {
    // Scenario: operations against a never-created session are quiet.
    let store = store();
    assert!(!store.delete_context_window("ghost").await);
    assert!(store.get_window_stats("ghost").await.is_none());
    assert!(store.get_context_for_api("ghost", None).await.is_empty());
    assert!(store.compress_context("ghost").await.is_none());
}

#[tokio::test]
async fn create_context_window_is_idempotent() {
    let store = store();
    let first = store
        .create_context_window("e", Some(small_window(PruningStrategy::Fifo)))
        .await;
    store.add_message("e", user("hello there"), None).await;

    // A second create with a different config must not reset anything
    let second = store
        .create_context_window("e", Some(small_window(PruningStrategy::Lifo)))
        .await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.config.pruning_strategy, PruningStrategy::Fifo);
    assert_eq!(second.messages.len(), 1);
}

#[tokio::test]
async fn accounting_invariant_holds_after_every_mutation() {
    let store = store();
    let config = small_window(PruningStrategy::Hybrid)
        .with_summarization_enabled(true)
        .with_compression_level(CompressionLevel::Light);

    for i in 0..30 {
        let outcome = store
            .add_message(
                "f",
                user(format!("message number {i} {}", filler(60))),
                Some(config.clone()),
            )
            .await;

        let w = &outcome.window;
        let expected: usize = w.messages.iter().map(|m| m.token_count).sum::<usize>()
            + w.summaries.iter().map(|s| s.token_count).sum::<usize>();
        assert_eq!(w.total_tokens, expected, "accounting drift at message {i}");
        assert!(w.total_tokens <= w.config.max_tokens);
    }
}

#[tokio::test]
async fn stats_match_stored_collections() -> anyhow::Result<()> {
    let store = store();
    let config = small_window(PruningStrategy::Fifo);
    store
        .add_message("g", user("one short message"), Some(config.clone()))
        .await;
    let outcome = store.add_message("g", user("and another"), Some(config)).await;

    let stats = store.get_window_stats("g").await.context("window missing")?;
    assert_eq!(stats.message_count, outcome.window.messages.len());
    assert_eq!(stats.summary_count, outcome.window.summaries.len());
    assert_eq!(stats.total_tokens, outcome.window.total_tokens);
    assert_eq!(stats.max_tokens, 1_000);
    Ok(())
}

#[tokio::test]
async fn forced_truncation_is_flagged_not_silent() -> anyhow::Result<()> {
    // A single protected system message larger than the entire budget forces
    // the pathological truncation path, which must be visible in stats.
    let store = store();
    let config = small_window(PruningStrategy::Fifo).with_keep_system_messages(true);

    let outcome = store
        .add_message(
            "h",
            IncomingMessage::new(MessageRole::System, filler(1_500)),
            Some(config),
        )
        .await;

    let stats = outcome.stats.context("pipeline should have run")?;
    assert!(stats.forced_truncation);
    assert!(outcome.window.total_tokens <= 1_000);
    assert!(outcome.window.messages[0].content.ends_with("[TRUNCATED]"));
    Ok(())
}

#[tokio::test]
async fn api_override_trims_without_mutating() -> anyhow::Result<()> {
    let store = store();
    let config = small_window(PruningStrategy::Fifo);

    for _ in 0..7 {
        store.add_message("i", user(filler(100)), Some(config.clone())).await;
    }
    let before = store.get_window_stats("i").await.context("window missing")?;

    let trimmed = store.get_context_for_api("i", Some(300)).await;
    let total: usize = trimmed.iter().map(|m| m.token_count).sum();
    assert!(total <= 300, "override ceiling breached: {total}");

    let after = store.get_window_stats("i").await.context("window missing")?;
    assert_eq!(after.message_count, before.message_count);
    assert_eq!(after.total_tokens, before.total_tokens);
    Ok(())
}

#[tokio::test]
async fn lifo_evicts_the_newest_eligible_first() -> anyhow::Result<()> {
    let store = store();
    let config = small_window(PruningStrategy::Lifo);

    for _ in 0..8 {
        store.add_message("j", user(filler(100)), Some(config.clone())).await;
    }
    // Ninth message crosses the trigger; under lifo the newest goes
    let outcome = store.add_message("j", user(filler(100)), Some(config)).await;
    let stats = outcome.stats.context("pipeline should have run")?;
    assert!(stats.victims_removed >= 1);

    let indices: Vec<u64> = outcome
        .window
        .messages
        .iter()
        .map(|m| m.sequence_index)
        .collect();
    assert!(indices.contains(&0), "oldest message survives under lifo");
    assert!(!indices.contains(&8), "newest message is the lifo victim");
    Ok(())
}

#[tokio::test]
async fn forced_compress_context_reports_stats() -> anyhow::Result<()> {
    let store = store();
    let config = small_window(PruningStrategy::Fifo);
    store.add_message("k", user(filler(100)), Some(config)).await;

    let outcome = store.compress_context("k").await.context("window missing")?;
    assert_eq!(outcome.stats.strategy_used, PruningStrategy::Fifo);
    assert_eq!(outcome.stats.victims_removed, 0);
    assert_eq!(outcome.window.messages.len(), 1);
    Ok(())
}
