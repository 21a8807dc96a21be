// File: chaos-monkey/src/orchestrator/rng.rs
//
// Deterministic Random Source
//
// Every draw the monkey makes (behaviour selection and whatever actions pull
// while being bound) goes through one seeded engine, so a run can be replayed
// from its 32-bit seed.

use crate::error::{MonkeyError, MonkeyResult};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Environment variable consulted by [`Seed::from_env_or_random`]
pub const SEED_ENV_VAR: &str = "TOS_MONKEY_SEED";

/// 32-bit seed identifying the randomness of a run
///
/// Conversions from wider integers, floats and strings are checked and fail
/// with [`MonkeyError::InvalidSeed`] when the value is not an integer in
/// `0..=u32::MAX`. Strings may be decimal or `0x`-prefixed hexadecimal.
///
/// ```rust
/// use tos_chaos_monkey::Seed;
///
/// let seed: Seed = "0x2a".parse().unwrap();
/// assert_eq!(seed, Seed::new(42));
/// assert!(Seed::try_from(-1i64).is_err());
/// assert!(Seed::try_from(1.5f64).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Seed(u32);

impl Seed {
    /// Wrap a raw 32-bit value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw 32-bit value
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Fresh seed from the thread RNG
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// Seed from `TOS_MONKEY_SEED`, or a fresh random one
    ///
    /// An unparsable variable is ignored with a warning rather than failing,
    /// so a stale shell export never blocks a run.
    pub fn from_env_or_random() -> Self {
        match std::env::var(SEED_ENV_VAR) {
            Ok(raw) => match raw.parse() {
                Ok(seed) => seed,
                Err(e) => {
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("Ignoring {}: {}", SEED_ENV_VAR, e);
                    }
                    Self::random()
                }
            },
            Err(_) => Self::random(),
        }
    }
}

impl Display for Seed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Seed> for u32 {
    fn from(seed: Seed) -> Self {
        seed.0
    }
}

impl TryFrom<u64> for Seed {
    type Error = MonkeyError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .map(Self)
            .map_err(|_| MonkeyError::InvalidSeed(value.to_string()))
    }
}

impl TryFrom<i64> for Seed {
    type Error = MonkeyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .map(Self)
            .map_err(|_| MonkeyError::InvalidSeed(value.to_string()))
    }
}

impl TryFrom<f64> for Seed {
    type Error = MonkeyError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > u32::MAX as f64 {
            return Err(MonkeyError::InvalidSeed(value.to_string()));
        }
        Ok(Self(value as u32))
    }
}

impl FromStr for Seed {
    type Err = MonkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => trimmed.parse::<u32>(),
        };
        parsed
            .map(Self)
            .map_err(|_| MonkeyError::InvalidSeed(s.to_string()))
    }
}

/// Injectable source of randomness
///
/// The scheduler only needs these primitives, which keeps the engine
/// replaceable by a scripted implementation in tests.
pub trait RandomSource: Send + Sync {
    /// Seed the current draw sequence started from
    fn seed(&self) -> Seed;

    /// Draw the next 32-bit value
    fn next_u32(&self) -> u32;

    /// Draw the next 64-bit value
    fn next_u64(&self) -> u64;

    /// Draw an index uniformly from `0..len`, `None` when `len` is zero
    fn pick_index(&self, len: usize) -> Option<usize>;

    /// Draw uniformly from `low..high`, `None` when the range is empty
    ///
    /// The default rejects the short tail of the 64-bit space so no value is
    /// favoured over another.
    fn gen_range_u64(&self, low: u64, high: u64) -> Option<u64> {
        if low >= high {
            return None;
        }
        let span = high - low;
        // 2^64 mod span
        let threshold = span.wrapping_neg() % span;
        loop {
            let x = self.next_u64();
            if x >= threshold {
                return Some(low + x % span);
            }
        }
    }

    /// Discard the draw state and restart the sequence from `seed`
    fn reseed(&self, seed: Seed);
}

/// Seeded engine backing every monkey run
///
/// Draws are serialized by a mutex, so the engine can be shared between the
/// tick loop and the actions it binds.
///
/// # Examples
///
/// ```rust
/// use tos_chaos_monkey::orchestrator::rng::{RandomSource, SeededRng};
/// use tos_chaos_monkey::Seed;
///
/// let a = SeededRng::new(Seed::new(7));
/// let b = SeededRng::new(Seed::new(7));
/// assert_eq!(a.next_u32(), b.next_u32());
/// assert_eq!(a.gen_range_u64(1, 101), b.gen_range_u64(1, 101));
/// ```
pub struct SeededRng {
    inner: Mutex<StdRng>,
    seed: AtomicU32,
}

impl SeededRng {
    /// Create an engine from an explicit seed
    pub fn new(seed: Seed) -> Self {
        Self {
            inner: Mutex::new(Self::engine(seed)),
            seed: AtomicU32::new(seed.value()),
        }
    }

    fn engine(seed: Seed) -> StdRng {
        StdRng::seed_from_u64(seed.value() as u64)
    }
}

impl RandomSource for SeededRng {
    fn seed(&self) -> Seed {
        Seed(self.seed.load(Ordering::Acquire))
    }

    fn next_u32(&self) -> u32 {
        self.inner.lock().next_u32()
    }

    fn next_u64(&self) -> u64 {
        self.inner.lock().next_u64()
    }

    fn pick_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.inner.lock().gen_range(0..len))
    }

    fn gen_range_u64(&self, low: u64, high: u64) -> Option<u64> {
        if low >= high {
            return None;
        }
        Some(self.inner.lock().gen_range(low..high))
    }

    fn reseed(&self, seed: Seed) {
        let mut inner = self.inner.lock();
        *inner = Self::engine(seed);
        self.seed.store(seed.value(), Ordering::Release);
    }
}

/// Parse a seed given on a command line or in a config file
pub fn parse_seed(raw: &str) -> MonkeyResult<Seed> {
    raw.parse()
}
