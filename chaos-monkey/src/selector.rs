// File: chaos-monkey/src/selector.rs
//
// Behaviour Selector
//
// One uniform draw over the registered name set per tick. The set comes from
// the registry in canonical (sorted) order, so the same seed picks the same
// names no matter how the registry was filled.

use crate::error::{MonkeyError, MonkeyResult};
use crate::orchestrator::rng::RandomSource;
use crate::registry::Registry;

/// Draw one name uniformly from `names`
///
/// # Errors
///
/// - `EmptyRegistry` if `names` is empty
/// - `InvalidDraw` if the source returns an index outside `names`
pub fn pick<'a>(names: &[&'a str], rng: &dyn RandomSource) -> MonkeyResult<&'a str> {
    let idx = rng.pick_index(names.len()).ok_or(MonkeyError::EmptyRegistry)?;
    names.get(idx).copied().ok_or(MonkeyError::InvalidDraw {
        index: idx,
        len: names.len(),
    })
}

/// Draw one registered behaviour name
pub fn select<T>(registry: &Registry<T>, rng: &dyn RandomSource) -> MonkeyResult<String> {
    pick(&registry.names(), rng).map(str::to_string)
}
