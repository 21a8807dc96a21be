// File: chaos-monkey/src/arbitrary.rs
//
// Arbitrary Actions
//
// An action generator is anything that can be bound to a locale and to the
// monkey's random source and then hand back an awaitable execution. Binding is
// synchronous: all randomness an action needs is drawn in `prepare`, before its
// asynchronous body starts, so overlapping executions never interleave draws.

use crate::orchestrator::rng::RandomSource;
use anyhow::Result;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

/// Awaitable execution produced by an action
pub type ActionFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// Default locale tag
pub const DEFAULT_LOCALE: &str = "en";

/// Locale tag actions are bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale(String);

impl Locale {
    /// Wrap a locale tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Locale tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self(DEFAULT_LOCALE.to_string())
    }
}

impl Display for Locale {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything an action is bound to when it is launched
pub struct ActionContext<'a> {
    /// Locale of the run
    pub locale: &'a Locale,
    /// Shared random source of the run
    pub rng: &'a dyn RandomSource,
}

/// Capability required from every registered behaviour
///
/// # Examples
///
/// ```rust
/// use tos_chaos_monkey::arbitrary::{action, ActionContext, ArbitraryAction};
///
/// // Draw the amount while binding, then run the effect asynchronously
/// let deposit = action(|ctx: &ActionContext<'_>| {
///     let amount = ctx.rng.next_u32() % 1_000;
///     async move { Ok(amount) }
/// });
/// assert!(deposit.validate().is_ok());
/// ```
pub trait ArbitraryAction<T>: Send + Sync {
    /// Check that this generator is able to produce executions at all
    ///
    /// Called once at registration; a failure is reported as an invalid action.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Bind to the context and produce the execution
    fn prepare(&self, ctx: &ActionContext<'_>) -> ActionFuture<T>;
}

/// Action built from a closure, see [`action`]
pub struct FnAction<F> {
    f: F,
}

impl<T, F, Fut> ArbitraryAction<T> for FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn prepare(&self, ctx: &ActionContext<'_>) -> ActionFuture<T> {
        Box::pin((self.f)(ctx))
    }
}

/// Build an action from a closure
///
/// The closure runs synchronously at launch with the bound context; the
/// future it returns is the asynchronous body.
pub fn action<T, F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(&ActionContext<'_>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    FnAction { f }
}

/// Uniform pick among fixed items, see [`elements`]
pub struct Elements<T> {
    items: Vec<T>,
}

impl<T> Elements<T> {
    /// Items this generator picks from
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T> ArbitraryAction<T> for Elements<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            anyhow::bail!("elements() needs at least one item");
        }
        Ok(())
    }

    fn prepare(&self, ctx: &ActionContext<'_>) -> ActionFuture<T> {
        let picked = ctx
            .rng
            .pick_index(self.items.len())
            .map(|idx| self.items[idx].clone());
        Box::pin(async move { picked.ok_or_else(|| anyhow::anyhow!("elements() has no item")) })
    }
}

/// Resolve to one of `items`, drawn uniformly from the bound engine
pub fn elements<T, I>(items: I) -> Elements<T>
where
    I: IntoIterator<Item = T>,
{
    Elements {
        items: items.into_iter().collect(),
    }
}

/// Always resolves to the same value, see [`just`]
pub struct Just<T> {
    value: T,
}

impl<T> ArbitraryAction<T> for Just<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn prepare(&self, _ctx: &ActionContext<'_>) -> ActionFuture<T> {
        let value = self.value.clone();
        Box::pin(async move { Ok(value) })
    }
}

/// Resolve to `value` without drawing anything
pub fn just<T>(value: T) -> Just<T> {
    Just { value }
}
