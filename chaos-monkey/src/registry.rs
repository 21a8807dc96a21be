// File: chaos-monkey/src/registry.rs
//
// Action Registry
//
// Maps behaviour names to their action generator and checks. Names live in a
// sorted map: the set handed to the selector is always in the same canonical
// order, whatever the registration order or the process hash seed.

use crate::arbitrary::ArbitraryAction;
use crate::error::{MonkeyError, MonkeyResult};
use crate::hooks::{noop_post, noop_pre, PostHook, PreHook};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Optional checks attached to a behaviour
pub struct BehaviourOptions<T> {
    precondition: Option<PreHook>,
    postcondition: Option<PostHook<T>>,
}

impl<T> BehaviourOptions<T> {
    /// No precondition, no postcondition
    pub fn new() -> Self {
        Self {
            precondition: None,
            postcondition: None,
        }
    }

    /// Check run before the action is launched
    pub fn precondition<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.precondition = Some(Arc::new(f));
        self
    }

    /// Check run on the action result once it resolved
    pub fn postcondition<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.postcondition = Some(Arc::new(f));
        self
    }
}

impl<T> Default for BehaviourOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered behaviour
///
/// Cloning is cheap: the action and checks are shared.
pub struct Behaviour<T> {
    name: String,
    action: Arc<dyn ArbitraryAction<T>>,
    precondition: PreHook,
    postcondition: PostHook<T>,
}

impl<T> Clone for Behaviour<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            action: self.action.clone(),
            precondition: self.precondition.clone(),
            postcondition: self.postcondition.clone(),
        }
    }
}

impl<T> Behaviour<T> {
    /// Assemble a behaviour, missing checks default to no-ops
    pub fn new(
        name: impl Into<String>,
        action: Arc<dyn ArbitraryAction<T>>,
        options: BehaviourOptions<T>,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            precondition: options.precondition.unwrap_or_else(noop_pre),
            postcondition: options.postcondition.unwrap_or_else(noop_post),
        }
    }

    /// Behaviour name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Action generator
    pub fn action(&self) -> &Arc<dyn ArbitraryAction<T>> {
        &self.action
    }

    /// Precondition, a no-op when none was given
    pub fn precondition(&self) -> &PreHook {
        &self.precondition
    }

    /// Postcondition, a no-op when none was given
    pub fn postcondition(&self) -> &PostHook<T> {
        &self.postcondition
    }
}

/// Name -> behaviour mapping
pub struct Registry<T> {
    entries: BTreeMap<String, Behaviour<T>>,
}

impl<T> Registry<T> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert or replace the behaviour `name`
    ///
    /// Returns `true` when an existing entry was replaced.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if `name` is empty
    /// - `InvalidAction` if the generator cannot produce executions
    pub fn register(
        &mut self,
        name: &str,
        action: Arc<dyn ArbitraryAction<T>>,
        options: BehaviourOptions<T>,
    ) -> MonkeyResult<bool> {
        if name.is_empty() {
            return Err(MonkeyError::InvalidName);
        }
        action
            .validate()
            .map_err(|e| MonkeyError::InvalidAction {
                name: name.to_string(),
                reason: format!("{:#}", e),
            })?;

        let replaced = self
            .entries
            .insert(name.to_string(), Behaviour::new(name, action, options))
            .is_some();

        // Overwriting is kept, but it is rarely what the caller meant
        if replaced && log::log_enabled!(log::Level::Warn) {
            log::warn!("Behaviour '{}' registered twice, previous entry replaced", name);
        }
        Ok(replaced)
    }

    /// Behaviour registered under `name`
    pub fn get(&self, name: &str) -> MonkeyResult<&Behaviour<T>> {
        self.entries
            .get(name)
            .ok_or_else(|| MonkeyError::UnknownBehaviour(name.to_string()))
    }

    /// Current name set, in canonical order
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of behaviours
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no behaviour is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
