//! # Lethe - Token-Budgeted Context Window Management
//!
//! Lethe (Λήθη, the river of forgetting) keeps per-session conversation
//! context inside a configured token budget. It ingests messages, tracks
//! cumulative token cost, and as the ceiling approaches selects victims to
//! prune or summarize under a pluggable policy, handing a budget-compliant
//! message list to the downstream LLM client.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lethe_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let service = ContextService::start(LetheConfig::default())?;
//!
//!     let outcome = service
//!         .store()
//!         .add_message("session-1", IncomingMessage::new(MessageRole::User, "Hello"), None)
//!         .await;
//!     println!("window at {} tokens", outcome.window.total_tokens);
//!
//!     let messages = service.store().get_context_for_api("session-1", None).await;
//!     assert!(!messages.is_empty());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **TokenAccountant** (`tokens`): deterministic token-cost heuristic
//! - **PruningEngine** (`pruning`): pure victim ranking (fifo, lifo,
//!   importance, relevance, hybrid)
//! - **CompressionEngine** (`compression`): graded summaries plus a bounded
//!   summary cache
//! - **ContextAssembler** (`assembler`): the prune → summarize →
//!   hard-truncate pipeline and the outward message rendering
//! - **SessionWindowStore** (`store`): session-keyed windows with per-window
//!   exclusion
//! - **Reaper** (`reaper`): periodic idle-window eviction
//! - **ContextService** (`service`): the owning object wiring it together
//!
//! Budget pressure is the normal operating condition here: going over the
//! threshold is handled internally and never surfaces as an error.

pub mod assembler;
pub mod compression;
pub mod config;
pub mod error;
pub mod message;
pub mod pruning;
pub mod reaper;
pub mod service;
pub mod store;
pub mod tokens;
pub mod window;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a global tracing subscriber honoring `RUST_LOG`, defaulting to
/// `info`. Intended for hosts and tests; returns quietly if a subscriber is
/// already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::assembler::CompressionStats;
    pub use crate::compression::CompressionLevel;
    pub use crate::config::{LetheConfig, ReaperConfig, WindowConfig};
    pub use crate::error::{LetheError, Result};
    pub use crate::message::{IncomingMessage, Message, MessageRole, Summary};
    pub use crate::pruning::PruningStrategy;
    pub use crate::reaper::Reaper;
    pub use crate::service::ContextService;
    pub use crate::store::{AddMessageOutcome, CompressOutcome, SessionWindowStore};
    pub use crate::window::{ContextWindow, WindowStats};
}
