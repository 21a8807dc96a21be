//! # TOS Chaos Monkey
//!
//! Seeded randomized-action scheduler for exploratory and stress testing.
//!
//! Callers register named behaviours (an action generator plus optional
//! pre/post checks). On every tick the monkey draws one behaviour uniformly
//! from a seeded engine, runs its checks around the asynchronous execution
//! and reports the outcome. The seed is printed at start so any failing run
//! can be replayed.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tos_chaos_monkey::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_queue_under_chaos() {
//!     let monkey: ChaosMonkey<usize> = ChaosMonkey::builder()
//!         .seed(Seed::new(42))
//!         .speed_ms(5)
//!         .build()
//!         .unwrap();
//!
//!     monkey
//!         .behaviour("push", action(|_: &ActionContext<'_>| async { Ok(1) }), BehaviourOptions::new())
//!         .unwrap();
//!
//!     monkey.start().unwrap();
//!     tokio::time::sleep(Duration::from_millis(100)).await;
//!     monkey.stop();
//!     monkey.drain().await;
//! }
//! ```
//!
//! ## Determinism
//!
//! 1. **One engine**: selection and every draw made while binding actions
//!    share a single seeded source
//! 2. **Canonical order**: behaviours are drawn from their sorted name set
//! 3. **Replay**: `TOS_MONKEY_SEED` or [`ChaosMonkey::replay`] restore a run

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Action generators and the context they are bound to
pub mod arbitrary;

/// Serializable settings
pub mod config;

/// Error types
pub mod error;

/// Global hooks and per-behaviour checks
pub mod hooks;

/// Seeded engine and tick loop
pub mod orchestrator;

/// Behaviour registry
pub mod registry;

/// Tick reports and their sinks
pub mod report;

/// Uniform behaviour selection
pub mod selector;

// Convenient re-exports for common usage
pub mod prelude;

// Re-export commonly used types at crate root
pub use config::MonkeyConfig;
pub use error::{MonkeyError, MonkeyResult};
pub use orchestrator::{ChaosMonkey, ChaosMonkeyBuilder, RunStatus, Seed, TaskHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
