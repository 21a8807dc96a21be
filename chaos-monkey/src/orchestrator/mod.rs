// File: chaos-monkey/src/orchestrator/mod.rs
//
// Orchestrator Module
//
// Seeded randomness and the tick loop driving it. Everything that decides
// *when* and *which* behaviour runs lives here.

/// Seeds and the deterministic random source
pub mod rng;
/// Tick loop, lifecycle and the monkey builder
pub mod scheduler;

pub use rng::{parse_seed, RandomSource, Seed, SeededRng, SEED_ENV_VAR};
pub use scheduler::{ChaosMonkey, ChaosMonkeyBuilder, RunStatus, TaskHandle};
