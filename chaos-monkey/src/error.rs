// File: chaos-monkey/src/error.rs
//
// Chaos Monkey Errors
//
// Registration and configuration errors are returned to the caller right away.
// Execution and hook errors are produced per tick and travel through the
// report sink instead.

use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Chaos monkey result type
pub type MonkeyResult<T> = Result<T, MonkeyError>;

/// Which hook of the pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Global hook run before every precondition
    GlobalPre,
    /// Per-behaviour precondition
    Precondition,
    /// Global hook run with the action result before every postcondition
    GlobalPost,
    /// Per-behaviour postcondition
    Postcondition,
}

impl Display for HookKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Self::GlobalPre => "global pre-hook",
            Self::Precondition => "precondition",
            Self::GlobalPost => "global post-hook",
            Self::Postcondition => "postcondition",
        };
        write!(f, "{}", str)
    }
}

/// Errors raised by the chaos monkey
#[derive(Debug, Error)]
pub enum MonkeyError {
    /// Seed is not an integer representable as 32-bit unsigned
    #[error("Invalid seed '{0}': expected an integer in 0..=4294967295")]
    InvalidSeed(String),

    /// Behaviour name is empty
    #[error("Behaviour name must be a non-empty string")]
    InvalidName,

    /// Action generator cannot produce executions
    #[error("Behaviour '{name}' has an invalid action: {reason}")]
    InvalidAction {
        /// Name the action was registered under
        name: String,
        /// Why the generator was rejected
        reason: String,
    },

    /// Lookup of a name that is not registered
    #[error("Unknown behaviour '{0}'")]
    UnknownBehaviour(String),

    /// Run started or draw attempted without any behaviour
    #[error("No behaviour registered")]
    EmptyRegistry,

    /// Random source returned an index outside the name set
    #[error("Random source drew index {index} from a set of {len} behaviours")]
    InvalidDraw {
        /// Index returned by the source
        index: usize,
        /// Size of the name set at draw time
        len: usize,
    },

    /// Rejected configuration value (speed, locale)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The asynchronous execution of an action failed or panicked
    #[error("Action of behaviour '{behaviour}' failed: {source:#}")]
    ActionExecutionFailed {
        /// Behaviour whose action failed
        behaviour: String,
        /// Error returned by the action, or its panic message
        #[source]
        source: anyhow::Error,
    },

    /// A global hook, precondition or postcondition failed or panicked
    #[error("The {hook} of behaviour '{behaviour}' failed: {source:#}")]
    HookFailed {
        /// Behaviour the hook ran for
        behaviour: String,
        /// Failing hook
        hook: HookKind,
        /// Error returned by the hook, or its panic message
        #[source]
        source: anyhow::Error,
    },
}

impl MonkeyError {
    /// Whether this error was produced while ticking rather than returned
    /// synchronously from a registration or lifecycle call
    pub fn is_tick_failure(&self) -> bool {
        matches!(
            self,
            Self::ActionExecutionFailed { .. } | Self::HookFailed { .. } | Self::InvalidDraw { .. }
        )
    }

    /// Behaviour involved in a tick failure, if any
    pub fn behaviour(&self) -> Option<&str> {
        match self {
            Self::ActionExecutionFailed { behaviour, .. } | Self::HookFailed { behaviour, .. } => {
                Some(behaviour)
            }
            Self::InvalidAction { name, .. } | Self::UnknownBehaviour(name) => Some(name),
            _ => None,
        }
    }
}
