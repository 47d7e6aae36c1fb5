//! Configuration types for the Lethe context manager

use serde::{Deserialize, Serialize};

use crate::compression::CompressionLevel;
use crate::error::{LetheError, Result};
use crate::pruning::PruningStrategy;

/// Lower bound for a window's token budget
pub const MIN_MAX_TOKENS: usize = 1_000;
/// Upper bound for a window's token budget
pub const MAX_MAX_TOKENS: usize = 128_000;

/// Per-window configuration, snapshotted into each window at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Hard token ceiling for the window (1000..=128000)
    pub max_tokens: usize,

    /// Fraction of `max_tokens` at which the compression pipeline triggers
    /// (0.5..=1.0)
    pub compression_threshold: f64,

    /// How aggressively victims are condensed
    pub compression_level: CompressionLevel,

    /// How victims are selected
    pub pruning_strategy: PruningStrategy,

    /// Whether system messages are protected from eviction
    pub keep_system_messages: bool,

    /// Whether victims are summarized rather than dropped outright
    pub summarization_enabled: bool,

    /// Whether identical victim sets reuse cached summaries
    pub cache_enabled: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8_000,
            compression_threshold: 0.8,
            compression_level: CompressionLevel::Moderate,
            pruning_strategy: PruningStrategy::Hybrid,
            keep_system_messages: true,
            summarization_enabled: true,
            cache_enabled: true,
        }
    }
}

impl WindowConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token ceiling (clamped to the supported range)
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.clamp(MIN_MAX_TOKENS, MAX_MAX_TOKENS);
        self
    }

    /// Set the trigger threshold (clamped to 0.5..=1.0)
    pub fn with_compression_threshold(mut self, threshold: f64) -> Self {
        self.compression_threshold = threshold.clamp(0.5, 1.0);
        self
    }

    /// Set the compression level
    pub fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the pruning strategy
    pub fn with_pruning_strategy(mut self, strategy: PruningStrategy) -> Self {
        self.pruning_strategy = strategy;
        self
    }

    /// Protect or expose system messages
    pub fn with_keep_system_messages(mut self, keep: bool) -> Self {
        self.keep_system_messages = keep;
        self
    }

    /// Enable or disable summarization
    pub fn with_summarization_enabled(mut self, enabled: bool) -> Self {
        self.summarization_enabled = enabled;
        self
    }

    /// Enable or disable the summary cache
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Token level at which the compression pipeline triggers
    pub fn trigger_tokens(&self) -> usize {
        ((self.max_tokens as f64) * self.compression_threshold).floor() as usize
    }

    /// Validate ranges on configs that arrived by deserialization
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.max_tokens) {
            return Err(LetheError::Configuration(format!(
                "max_tokens must be in [{}, {}], got {}",
                MIN_MAX_TOKENS, MAX_MAX_TOKENS, self.max_tokens
            )));
        }
        if !(0.5..=1.0).contains(&self.compression_threshold) {
            return Err(LetheError::Configuration(format!(
                "compression_threshold must be in [0.5, 1.0], got {}",
                self.compression_threshold
            )));
        }
        Ok(())
    }
}

/// Idle-window reaper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Whether the background sweep runs at all
    pub enabled: bool,

    /// Seconds between sweeps
    pub sweep_interval_secs: u64,

    /// Windows idle for longer than this many minutes are reclaimed
    pub idle_minutes: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 60,
            idle_minutes: 30,
        }
    }
}

impl ReaperConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval in seconds
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs.max(1);
        self
    }

    /// Set the idle threshold in minutes
    pub fn with_idle_minutes(mut self, minutes: u64) -> Self {
        self.idle_minutes = minutes.max(1);
        self
    }

    /// Enable or disable the sweep
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetheConfig {
    /// Defaults applied to windows created without an explicit config
    #[serde(default)]
    pub window: WindowConfig,

    /// Background reaper behavior
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Capacity of the shared summary cache
    #[serde(default = "default_summary_cache_capacity")]
    pub summary_cache_capacity: usize,
}

fn default_summary_cache_capacity() -> usize {
    128
}

impl Default for LetheConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            reaper: ReaperConfig::default(),
            summary_cache_capacity: default_summary_cache_capacity(),
        }
    }
}

impl LetheConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (lethe.toml or path from LETHE_CONFIG_PATH)
    /// 3. Environment variable overrides (LETHE_ prefix)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid or values are
    /// out of range.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(LetheConfig::default()))
            .merge(Toml::file("lethe.toml"))
            .merge(Env::prefixed("LETHE_").split("_"));

        if let Ok(path) = std::env::var("LETHE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: LetheConfig = figment.extract().map_err(|e| {
            LetheError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: LetheConfig = Figment::from(Serialized::defaults(LetheConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                LetheError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        if self.summary_cache_capacity == 0 {
            return Err(LetheError::Configuration(
                "summary_cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
