//! Context Service
//!
//! The single owning object for the process-wide session map: holds the
//! store, starts the reaper on init, and tears both down on shutdown. The
//! transport layer and process host talk to this, never to ambient globals.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::config::LetheConfig;
use crate::error::{LetheError, Result};
use crate::reaper::Reaper;
use crate::store::SessionWindowStore;

/// Owns the session window store and its background reaper
pub struct ContextService {
    store: Arc<SessionWindowStore>,
    reaper: Reaper,
    config: LetheConfig,
    running: bool,
}

impl ContextService {
    /// Start the service: build the store and spawn the reaper.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration fails validation.
    pub fn start(config: LetheConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(SessionWindowStore::new(&config));
        let reaper = Reaper::spawn(Arc::clone(&store), config.reaper.clone());
        info!(
            default_max_tokens = config.window.max_tokens,
            strategy = %config.window.pruning_strategy,
            "context service started"
        );

        Ok(Self {
            store,
            reaper,
            config,
            running: true,
        })
    }

    /// Start with defaults; convenient for tests and embedding
    pub fn start_default() -> Result<Self> {
        Self::start(LetheConfig::default())
    }

    /// The session window store
    pub fn store(&self) -> &Arc<SessionWindowStore> {
        &self.store
    }

    /// The configuration the service was started with
    pub fn config(&self) -> &LetheConfig {
        &self.config
    }

    /// Whether the service is accepting work
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Run one reaper sweep on demand, outside the background schedule.
    ///
    /// `older_than_minutes` defaults to the configured idle threshold.
    /// Returns the number of windows reclaimed.
    pub async fn cleanup(&self, older_than_minutes: Option<u64>) -> Result<usize> {
        if !self.running {
            return Err(LetheError::Service("service is shut down".to_string()));
        }
        let minutes = older_than_minutes.unwrap_or(self.config.reaper.idle_minutes);
        Ok(self.store.cleanup(Duration::minutes(minutes as i64)).await)
    }

    /// Stop the reaper and release every window
    pub async fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.reaper.stop();
        self.store.clear().await;
        self.running = false;
        info!("context service shut down");
    }
}
