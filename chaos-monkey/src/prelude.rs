// File: chaos-monkey/src/prelude.rs
//
// Prelude
//
// `use tos_chaos_monkey::prelude::*;` brings in everything needed to
// register behaviours and drive a run.

pub use crate::arbitrary::{action, elements, just, ActionContext, ArbitraryAction, Locale};
pub use crate::config::MonkeyConfig;
pub use crate::error::{HookKind, MonkeyError, MonkeyResult};
pub use crate::orchestrator::{
    ChaosMonkey, ChaosMonkeyBuilder, RandomSource, RunStatus, Seed, SeededRng, TaskHandle,
};
pub use crate::registry::BehaviourOptions;
pub use crate::report::{ChannelSink, LogSink, ReportSink, TickReport};

pub use std::sync::Arc;
pub use std::time::Duration;
