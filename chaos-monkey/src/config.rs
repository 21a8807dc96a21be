// File: chaos-monkey/src/config.rs
//
// Monkey Configuration
//
// Plain, serializable settings of a run. Hooks and sinks are code, so they are
// set on the builder instead.

use crate::arbitrary::{Locale, DEFAULT_LOCALE};
use crate::error::{MonkeyError, MonkeyResult};
use crate::orchestrator::rng::Seed;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default interval between ticks, in milliseconds
pub const DEFAULT_SPEED_MS: u64 = 50;

/// Serializable monkey settings
///
/// ```rust
/// use tos_chaos_monkey::MonkeyConfig;
///
/// let config = MonkeyConfig::from_json_str(r#"{ "seed": 42, "speed_ms": 10 }"#).unwrap();
/// assert_eq!(config.speed_ms, 10);
/// assert_eq!(config.locale, "en");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonkeyConfig {
    /// Seed of the run, random (or `TOS_MONKEY_SEED`) when absent
    pub seed: Option<u64>,
    /// Milliseconds between ticks, must be positive
    pub speed_ms: u64,
    /// Locale tag actions are bound to
    pub locale: String,
}

impl Default for MonkeyConfig {
    fn default() -> Self {
        Self {
            seed: None,
            speed_ms: DEFAULT_SPEED_MS,
            locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

impl MonkeyConfig {
    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Invalid monkey configuration")
    }

    /// Read and parse a JSON file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&content)
    }

    /// Checked seed, `None` when the config leaves it open
    pub fn seed(&self) -> MonkeyResult<Option<Seed>> {
        self.seed.map(Seed::try_from).transpose()
    }

    /// Checked tick interval
    pub fn speed(&self) -> MonkeyResult<Duration> {
        if self.speed_ms == 0 {
            return Err(MonkeyError::InvalidConfig(
                "speed_ms must be positive".to_string(),
            ));
        }
        Ok(Duration::from_millis(self.speed_ms))
    }

    /// Checked locale
    pub fn locale(&self) -> MonkeyResult<Locale> {
        if self.locale.trim().is_empty() {
            return Err(MonkeyError::InvalidConfig(
                "locale must not be empty".to_string(),
            ));
        }
        Ok(Locale::new(self.locale.clone()))
    }

    /// Validate every field at once
    pub fn validate(&self) -> MonkeyResult<()> {
        self.seed()?;
        self.speed()?;
        self.locale()?;
        Ok(())
    }
}
