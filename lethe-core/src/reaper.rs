//! Idle-Window Reaper
//!
//! A single background task that periodically sweeps the store and reclaims
//! windows nobody has touched for a configured stretch. The store performs
//! the freshness re-check under each window's own lock, so the reaper never
//! races a mutator into deleting a live window.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ReaperConfig;
use crate::store::SessionWindowStore;

/// Handle to the background sweep task
pub struct Reaper {
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Spawn the sweep loop against a store.
    ///
    /// Returns an inert reaper when sweeping is disabled in config.
    pub fn spawn(store: Arc<SessionWindowStore>, config: ReaperConfig) -> Self {
        if !config.enabled {
            debug!("reaper disabled by configuration");
            return Self { handle: None };
        }

        let sweep_every = StdDuration::from_secs(config.sweep_interval_secs);
        let idle_after = Duration::minutes(config.idle_minutes as i64);
        info!(
            interval_secs = config.sweep_interval_secs,
            idle_minutes = config.idle_minutes,
            "reaper started"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            // The first tick fires immediately; skip it so a fresh service
            // does not sweep before anything could go idle.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reclaimed = store.cleanup(idle_after).await;
                debug!(reclaimed, "reaper sweep complete");
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Whether the sweep loop is running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the sweep loop
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("reaper stopped");
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}
