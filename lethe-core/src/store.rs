//! Session-Keyed Window Storage
//!
//! One window per session. The session map is a shared structure behind a
//! short-hold `std::sync::RwLock` (never held across an `.await`); each
//! window mutates under its own `tokio::sync::Mutex`, so unrelated sessions
//! never serialize against each other and same-session operations are
//! handled in arrival order at lock acquisition.

use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, RwLock};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::assembler::{self, CompressionStats};
use crate::compression::SummaryCache;
use crate::config::{LetheConfig, WindowConfig};
use crate::message::{IncomingMessage, Message};
use crate::window::{ContextWindow, WindowStats};

/// Result of admitting a message into a session's window
#[derive(Debug, Clone)]
pub struct AddMessageOutcome {
    /// Snapshot of the window after admission and any reclamation
    pub window: ContextWindow,
    /// Whether victims were folded into a summary during this call
    pub compression_applied: bool,
    /// Pipeline stats, present when the pipeline ran
    pub stats: Option<CompressionStats>,
}

/// Result of a forced compression pass
#[derive(Debug, Clone)]
pub struct CompressOutcome {
    /// Pipeline stats for the pass
    pub stats: CompressionStats,
    /// Snapshot of the window after the pass
    pub window: ContextWindow,
}

type SharedWindow = Arc<Mutex<ContextWindow>>;

/// In-memory store of per-session context windows
pub struct SessionWindowStore {
    windows: RwLock<HashMap<String, SharedWindow>>,
    summary_cache: StdMutex<SummaryCache>,
    default_config: WindowConfig,
}

impl SessionWindowStore {
    /// Create a store from service configuration
    pub fn new(config: &LetheConfig) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            summary_cache: StdMutex::new(SummaryCache::new(config.summary_cache_capacity)),
            default_config: config.window.clone(),
        }
    }

    /// Create or fetch the window for a session.
    ///
    /// Idempotent: a second call with the same session ID returns the
    /// existing window unchanged, ignoring the supplied config.
    pub async fn create_context_window(
        &self,
        session_id: &str,
        config: Option<WindowConfig>,
    ) -> ContextWindow {
        let shared = self.get_or_create(session_id, config);
        let guard = shared.lock().await;
        guard.clone()
    }

    /// Admit a message, auto-creating the window with defaults when absent,
    /// and run the budget pipeline.
    pub async fn add_message(
        &self,
        session_id: &str,
        message: IncomingMessage,
        config: Option<WindowConfig>,
    ) -> AddMessageOutcome {
        loop {
            let shared = self.get_or_create(session_id, config.clone());
            let mut guard = shared.lock().await;
            if guard.evicted {
                // The reaper or an explicit delete got here between our map
                // lookup and lock acquisition; retry against a fresh window.
                debug!(session_id, "window evicted mid-flight, retrying");
                continue;
            }

            guard.push_message(message.clone());
            guard.touch();

            let stats = {
                let mut cache = self.summary_cache.lock().expect("summary cache poisoned");
                assembler::enforce_budget(&mut guard, Some(&mut cache))
            };
            let compression_applied = stats
                .as_ref()
                .map(|s| s.compression_applied)
                .unwrap_or(false);

            return AddMessageOutcome {
                window: guard.clone(),
                compression_applied,
                stats,
            };
        }
    }

    /// Force a reclamation pass on a session's window.
    ///
    /// Returns `None` when no window exists; absence is steady state.
    pub async fn compress_context(&self, session_id: &str) -> Option<CompressOutcome> {
        let shared = self.lookup(session_id)?;
        let mut guard = shared.lock().await;
        if guard.evicted {
            return None;
        }
        guard.touch();

        let stats = {
            let mut cache = self.summary_cache.lock().expect("summary cache poisoned");
            assembler::reclaim(&mut guard, Some(&mut cache))
        };

        Some(CompressOutcome {
            stats,
            window: guard.clone(),
        })
    }

    /// Render the outward message list for a session.
    ///
    /// An empty list signals "no such session". The optional override trims
    /// a copy; stored state is never mutated by a read.
    pub async fn get_context_for_api(
        &self,
        session_id: &str,
        max_tokens_override: Option<usize>,
    ) -> Vec<Message> {
        let Some(shared) = self.lookup(session_id) else {
            return Vec::new();
        };
        let mut guard = shared.lock().await;
        if guard.evicted {
            return Vec::new();
        }
        guard.touch();
        assembler::render_for_api(&guard, max_tokens_override)
    }

    /// Usage statistics for a session's window, `None` when absent.
    ///
    /// Monitoring reads deliberately do not refresh `last_accessed_at`, so
    /// polling stats never keeps an idle window alive.
    pub async fn get_window_stats(&self, session_id: &str) -> Option<WindowStats> {
        let shared = self.lookup(session_id)?;
        let guard = shared.lock().await;
        if guard.evicted {
            return None;
        }
        Some(guard.stats())
    }

    /// Delete a session's window. Returns `false` when absent.
    pub async fn delete_context_window(&self, session_id: &str) -> bool {
        let removed = {
            let mut windows = self.windows.write().expect("window map poisoned");
            windows.remove(session_id)
        };
        match removed {
            Some(shared) => {
                let mut guard = shared.lock().await;
                guard.evicted = true;
                true
            }
            None => false,
        }
    }

    /// Reclaim windows idle for longer than `older_than`.
    ///
    /// Freshness is re-checked under the per-window lock immediately before
    /// removal, so a window touched after the scan snapshot is never wrongly
    /// deleted.
    pub async fn cleanup(&self, older_than: Duration) -> usize {
        let snapshot: Vec<(String, SharedWindow)> = {
            let windows = self.windows.read().expect("window map poisoned");
            windows
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        };

        let cutoff = Utc::now() - older_than;
        let mut reclaimed = 0usize;

        for (session_id, shared) in snapshot {
            let mut guard = shared.lock().await;
            if guard.evicted || guard.last_accessed_at >= cutoff {
                continue;
            }

            let mut windows = self.windows.write().expect("window map poisoned");
            // A delete-and-recreate may have put a different window under
            // the same session ID; only remove the one we inspected.
            let still_ours = windows
                .get(&session_id)
                .map(|entry| Arc::ptr_eq(entry, &shared))
                .unwrap_or(false);
            if still_ours {
                windows.remove(&session_id);
                guard.evicted = true;
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            info!(reclaimed, "reaper reclaimed idle windows");
        }
        reclaimed
    }

    /// Number of live windows
    pub fn session_count(&self) -> usize {
        self.windows.read().expect("window map poisoned").len()
    }

    /// Drop every window; used by service teardown
    pub async fn clear(&self) {
        let drained: Vec<SharedWindow> = {
            let mut windows = self.windows.write().expect("window map poisoned");
            windows.drain().map(|(_, v)| v).collect()
        };
        for shared in drained {
            shared.lock().await.evicted = true;
        }
    }

    /// Shift a window's last access into the past; test-only aging knob
    #[cfg(test)]
    pub(crate) async fn backdate(&self, session_id: &str, by: Duration) {
        if let Some(shared) = self.lookup(session_id) {
            let mut guard = shared.lock().await;
            guard.last_accessed_at -= by;
        }
    }

    fn lookup(&self, session_id: &str) -> Option<SharedWindow> {
        let windows = self.windows.read().expect("window map poisoned");
        windows.get(session_id).cloned()
    }

    fn get_or_create(&self, session_id: &str, config: Option<WindowConfig>) -> SharedWindow {
        if let Some(existing) = self.lookup(session_id) {
            return existing;
        }
        let mut windows = self.windows.write().expect("window map poisoned");
        windows
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let config = config.unwrap_or_else(|| self.default_config.clone());
                debug!(session_id, max_tokens = config.max_tokens, "window created");
                Arc::new(Mutex::new(ContextWindow::new(session_id, config)))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageRole;

    fn store() -> SessionWindowStore {
        SessionWindowStore::new(&LetheConfig::default())
    }

    fn user(content: &str) -> IncomingMessage {
        IncomingMessage::new(MessageRole::User, content)
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = store();
        let first = store.create_context_window("s1", None).await;

        store.add_message("s1", user("hello"), None).await;

        let second = store.create_context_window("s1", None).await;
        assert_eq!(second.id, first.id);
        assert_eq!(second.messages.len(), 1);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_add_message_auto_creates() {
        let store = store();
        let outcome = store.add_message("fresh", user("hi there"), None).await;
        assert_eq!(outcome.window.messages.len(), 1);
        assert!(outcome.window.total_tokens > 0);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_absent_returns_false() {
        let store = store();
        assert!(!store.delete_context_window("nope").await);
        assert!(store.get_window_stats("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_then_stats_none() {
        let store = store();
        store.add_message("s1", user("hello"), None).await;
        assert!(store.delete_context_window("s1").await);
        assert!(store.get_window_stats("s1").await.is_none());
        assert!(store.get_context_for_api("s1", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_stats_reflect_collections() {
        let store = store();
        store.add_message("s1", user("one message here"), None).await;
        store.add_message("s1", user("another message"), None).await;

        let stats = store.get_window_stats("s1").await.unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.summary_count, 0);
        assert!(stats.utilization_percentage > 0.0);
    }

    #[tokio::test]
    async fn test_compress_context_absent_is_none() {
        let store = store();
        assert!(store.compress_context("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_compress_context_compliant_window_is_idle() {
        let store = store();
        store.add_message("s1", user("small"), None).await;

        let outcome = store.compress_context("s1").await.unwrap();
        assert_eq!(outcome.stats.victims_removed, 0);
        assert!(!outcome.stats.compression_applied);
    }

    #[tokio::test]
    async fn test_cleanup_spares_fresh_windows() {
        let store = store();
        store.add_message("fresh", user("hello"), None).await;

        let reclaimed = store.cleanup(Duration::minutes(30)).await;
        assert_eq!(reclaimed, 0);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_reclaims_idle_windows() {
        let store = store();
        store.add_message("idle", user("hello"), None).await;

        // Backdate the window past the idle threshold
        {
            let shared = store.lookup("idle").unwrap();
            let mut guard = shared.lock().await;
            guard.last_accessed_at = Utc::now() - Duration::minutes(45);
        }

        let reclaimed = store.cleanup(Duration::minutes(30)).await;
        assert_eq!(reclaimed, 1);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let store = store();
        store.add_message("a", user("x"), None).await;
        store.add_message("b", user("y"), None).await;
        store.clear().await;
        assert_eq!(store.session_count(), 0);
    }
}
