// File: chaos-monkey/src/hooks.rs
//
// Hook Pipeline
//
// Pre-phase:  global pre-hook -> behaviour precondition
// Post-phase: global post-hook(result) -> behaviour postcondition(result)
//
// The first failing hook stops its phase. Panics are turned into hook failures
// so a misbehaving check never takes the tick loop down.

use crate::error::{HookKind, MonkeyError, MonkeyResult};
use crate::registry::Behaviour;
use anyhow::Result;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Hook taking no argument (global pre-hook, precondition)
pub type PreHook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Hook receiving the action result (global post-hook, postcondition)
pub type PostHook<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Pre-hook doing nothing
pub fn noop_pre() -> PreHook {
    Arc::new(|| -> Result<()> { Ok(()) })
}

/// Post-hook doing nothing
pub fn noop_post<T>() -> PostHook<T> {
    Arc::new(|_: &T| -> Result<()> { Ok(()) })
}

/// Global hooks wrapped around every behaviour's own checks
pub struct HookPipeline<T> {
    global_pre: PreHook,
    global_post: PostHook<T>,
}

impl<T> HookPipeline<T> {
    /// Pipeline with the given global hooks
    pub fn new(global_pre: PreHook, global_post: PostHook<T>) -> Self {
        Self {
            global_pre,
            global_post,
        }
    }

    /// Run the global pre-hook then the behaviour precondition
    pub fn run_pre(&self, behaviour: &Behaviour<T>) -> MonkeyResult<()> {
        guarded(behaviour.name(), HookKind::GlobalPre, || (self.global_pre)())?;
        guarded(behaviour.name(), HookKind::Precondition, || {
            (behaviour.precondition())()
        })
    }

    /// Run the global post-hook then the behaviour postcondition on `result`
    pub fn run_post(&self, behaviour: &Behaviour<T>, result: &T) -> MonkeyResult<()> {
        guarded(behaviour.name(), HookKind::GlobalPost, || {
            (self.global_post)(result)
        })?;
        guarded(behaviour.name(), HookKind::Postcondition, || {
            (behaviour.postcondition())(result)
        })
    }
}

impl<T> Default for HookPipeline<T> {
    fn default() -> Self {
        Self::new(noop_pre(), noop_post())
    }
}

fn guarded<F>(behaviour: &str, hook: HookKind, f: F) -> MonkeyResult<()>
where
    F: FnOnce() -> Result<()>,
{
    let outcome = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*payload))),
    };
    outcome.map_err(|source| MonkeyError::HookFailed {
        behaviour: behaviour.to_string(),
        hook,
        source,
    })
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
