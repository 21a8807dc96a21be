// File: chaos-monkey/src/orchestrator/scheduler.rs
//
// Scheduler / Lifecycle Controller
//
// Drives the periodic tick loop: select -> pre-phase -> bind and launch ->
// (asynchronously) post-phase -> report. The loop never waits for an action,
// so executions may overlap; only the selection order is deterministic.

use super::rng::{RandomSource, Seed, SeededRng, SEED_ENV_VAR};
use crate::arbitrary::{ActionContext, ActionFuture, ArbitraryAction, Locale};
use crate::config::{MonkeyConfig, DEFAULT_SPEED_MS};
use crate::error::{MonkeyError, MonkeyResult};
use crate::hooks::{noop_post, noop_pre, panic_message, HookPipeline, PostHook, PreHook};
use crate::registry::{Behaviour, BehaviourOptions, Registry};
use crate::report::{LogSink, ReportSink, TickReport};
use crate::selector;
use futures::FutureExt;
use log::{debug, error, info, trace};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Opaque identifier of an active tick loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    run: u64,
    seed: Seed,
}

impl TaskHandle {
    /// Run number, unique per scheduler
    pub fn run(&self) -> u64 {
        self.run
    }

    /// Seed the run started with
    pub fn seed(&self) -> Seed {
        self.seed
    }
}

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// No tick loop
    Idle,
    /// Tick loop active
    Running(TaskHandle),
}

enum Lifecycle {
    Idle,
    Running {
        handle: TaskHandle,
        task: JoinHandle<()>,
    },
}

struct Launched<T> {
    behaviour: Behaviour<T>,
    execution: ActionFuture<T>,
}

struct Shared<T> {
    registry: RwLock<Registry<T>>,
    rng: Arc<dyn RandomSource>,
    locale: Locale,
    speed: Duration,
    hooks: HookPipeline<T>,
    sink: Arc<dyn ReportSink<T>>,
    // Run number allowed to tick, 0 when idle
    active_run: Mutex<u64>,
    ticks: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight counter even if the sink panics
struct InFlightGuard<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        if self.shared.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}

impl<T: Send + 'static> Shared<T> {
    fn next_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn failed(tick: u64, behaviour: Option<String>, e: MonkeyError) -> TickReport<T> {
        TickReport {
            tick,
            behaviour,
            outcome: Err(e),
        }
    }

    /// Run `f` under the gate of `run`, `None` once that run was stopped
    ///
    /// Every draw of a scheduled tick goes through here, so a tick racing
    /// with stop or replay cannot consume the next run's sequence.
    fn gated<R>(&self, run: u64, f: impl FnOnce() -> R) -> Option<R> {
        let active = self.active_run.lock();
        if *active != run {
            return None;
        }
        Some(f())
    }

    /// Draw the behaviour of `tick`, cloned out of the registry
    fn choose(&self, tick: u64) -> Result<Behaviour<T>, TickReport<T>> {
        let registry = self.registry.read();
        selector::select(&*registry, self.rng.as_ref())
            .and_then(|name| registry.get(&name).map(Behaviour::clone))
            .map_err(|e| Self::failed(tick, e.behaviour().map(str::to_string), e))
    }

    fn pre_phase(&self, tick: u64, behaviour: &Behaviour<T>) -> Result<(), TickReport<T>> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("Tick #{}: selected '{}'", tick, behaviour.name());
        }
        self.hooks
            .run_pre(behaviour)
            .map_err(|e| Self::failed(tick, Some(behaviour.name().to_string()), e))
    }

    /// Bind the action to the locale and engine, producing its execution
    fn bind(&self, tick: u64, behaviour: Behaviour<T>) -> Result<Launched<T>, TickReport<T>> {
        let ctx = ActionContext {
            locale: &self.locale,
            rng: self.rng.as_ref(),
        };
        match catch_unwind(AssertUnwindSafe(|| behaviour.action().prepare(&ctx))) {
            Ok(execution) => Ok(Launched {
                behaviour,
                execution,
            }),
            Err(payload) => {
                let name = behaviour.name().to_string();
                Err(Self::failed(
                    tick,
                    Some(name.clone()),
                    MonkeyError::ActionExecutionFailed {
                        behaviour: name,
                        source: anyhow::anyhow!("panicked: {}", panic_message(&*payload)),
                    },
                ))
            }
        }
    }

    /// Synchronous part of an inline tick: selection, pre-phase and binding
    fn begin(&self, tick: u64) -> Result<Launched<T>, TickReport<T>> {
        let behaviour = self.choose(tick)?;
        self.pre_phase(tick, &behaviour)?;
        self.bind(tick, behaviour)
    }

    /// Asynchronous part of a tick: await the execution, then post-phase
    async fn settle(&self, tick: u64, launched: Launched<T>) -> TickReport<T> {
        let Launched {
            behaviour,
            execution,
        } = launched;
        let name = behaviour.name().to_string();

        let outcome = match AssertUnwindSafe(execution).catch_unwind().await {
            Ok(Ok(value)) => self.hooks.run_post(&behaviour, &value).map(|_| value),
            Ok(Err(source)) => Err(MonkeyError::ActionExecutionFailed {
                behaviour: name.clone(),
                source,
            }),
            Err(payload) => Err(MonkeyError::ActionExecutionFailed {
                behaviour: name.clone(),
                source: anyhow::anyhow!("panicked: {}", panic_message(&*payload)),
            }),
        };

        TickReport {
            tick,
            behaviour: Some(name),
            outcome,
        }
    }

    /// Hand a report to the sink, a panicking sink only loses that report
    fn deliver(&self, report: TickReport<T>) {
        let tick = report.tick;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.sink.report(report))) {
            if log::log_enabled!(log::Level::Error) {
                error!(
                    "Report sink panicked on tick #{}: {}",
                    tick,
                    panic_message(&*payload)
                );
            }
        }
    }

    /// One scheduled tick of `run`, the execution is spawned and not awaited
    ///
    /// Only the draws hold the gate, hooks run outside it.
    fn tick(self: &Arc<Self>, run: u64) {
        let Some((tick, chosen)) = self.gated(run, || {
            let tick = self.next_tick();
            (tick, self.choose(tick))
        }) else {
            return;
        };

        let bound = chosen
            .and_then(|behaviour| self.pre_phase(tick, &behaviour).map(|_| behaviour))
            .map(|behaviour| self.gated(run, || self.bind(tick, behaviour)));

        let launched = match bound {
            Err(report) => return self.deliver(report),
            Ok(None) => {
                if log::log_enabled!(log::Level::Debug) {
                    debug!("Tick #{} dropped: run #{} stopped before launch", tick, run);
                }
                return;
            }
            Ok(Some(Err(report))) => return self.deliver(report),
            Ok(Some(Ok(launched))) => launched,
        };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            shared: self.clone(),
        };
        tokio::spawn(async move {
            let report = guard.shared.settle(tick, launched).await;
            guard.shared.deliver(report);
            drop(guard);
        });
    }

    async fn run_loop(shared: Arc<Self>, run: u64) {
        // Like a plain interval timer: the first tick fires one period after start
        let mut interval = time::interval_at(Instant::now() + shared.speed, shared.speed);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            interval.tick().await;
            if *shared.active_run.lock() != run {
                if log::log_enabled!(log::Level::Trace) {
                    trace!("Tick loop of run #{} superseded", run);
                }
                break;
            }
            // A misbehaving random source must not end the run
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| shared.tick(run))) {
                if log::log_enabled!(log::Level::Error) {
                    error!("Tick of run #{} panicked: {}", run, panic_message(&*payload));
                }
            }
        }
    }
}

/// Seeded randomized-action scheduler
///
/// Behaviours are registered by name; every tick one of them is drawn from
/// the seeded engine, its checks run around its asynchronous execution, and
/// the outcome goes to the report sink.
///
/// # Examples
///
/// ```rust,no_run
/// use tos_chaos_monkey::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let monkey: ChaosMonkey<u32> = ChaosMonkey::builder()
///         .seed(Seed::new(42))
///         .speed_ms(10)
///         .build()?;
///
///     monkey.behaviour(
///         "roll",
///         action(|ctx: &ActionContext<'_>| {
///             let face = ctx.rng.gen_range_u64(1, 7).unwrap_or(1) as u32;
///             async move { Ok(face) }
///         }),
///         BehaviourOptions::new().postcondition(|face: &u32| {
///             anyhow::ensure!((1..=6).contains(face), "bad face {}", face);
///             Ok(())
///         }),
///     )?;
///
///     monkey.start()?;
///     tokio::time::sleep(std::time::Duration::from_millis(100)).await;
///     monkey.stop();
///     monkey.drain().await;
///     Ok(())
/// }
/// ```
pub struct ChaosMonkey<T> {
    shared: Arc<Shared<T>>,
    lifecycle: Mutex<Lifecycle>,
    runs: AtomicU64,
}

impl<T: Send + 'static> ChaosMonkey<T> {
    /// Monkey with default settings: random seed, 50ms ticks, `en` locale
    pub fn new() -> Self {
        ChaosMonkeyBuilder::new().assemble()
    }

    /// Start configuring a monkey
    pub fn builder() -> ChaosMonkeyBuilder<T> {
        ChaosMonkeyBuilder::new()
    }

    /// Register a behaviour, replacing any behaviour with the same name
    ///
    /// Allowed while running: the behaviour is eligible from the next tick.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if `name` is empty
    /// - `InvalidAction` if `action` cannot produce executions
    pub fn behaviour<A>(
        &self,
        name: &str,
        action: A,
        options: BehaviourOptions<T>,
    ) -> MonkeyResult<()>
    where
        A: ArbitraryAction<T> + 'static,
    {
        self.shared
            .registry
            .write()
            .register(name, Arc::new(action), options)?;
        if log::log_enabled!(log::Level::Debug) {
            debug!("Behaviour '{}' registered", name);
        }
        Ok(())
    }

    /// Start the tick loop, stopping a running one first
    ///
    /// The engine is reset to the current seed, which is written to stderr so
    /// the run can be replayed. Draws made before (`draw`, `step`, earlier
    /// runs) do not shift the sequence of the new run.
    ///
    /// # Errors
    ///
    /// `EmptyRegistry` if no behaviour is registered.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn start(&self) -> MonkeyResult<TaskHandle> {
        let mut lifecycle = self.lifecycle.lock();
        self.cancel(&mut lifecycle);
        self.launch(&mut lifecycle)
    }

    /// Stop the tick loop, no-op when idle
    ///
    /// Executions already launched are left to complete; their hooks and
    /// reports may still run afterwards. Use [`ChaosMonkey::drain`] to wait
    /// for them.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        self.cancel(&mut lifecycle);
    }

    /// Reset the engine to `seed` and start again
    ///
    /// Selections after this call are fully determined by `seed` and the
    /// current registry contents.
    ///
    /// # Errors
    ///
    /// `EmptyRegistry` if no behaviour is registered.
    pub fn replay(&self, seed: Seed) -> MonkeyResult<TaskHandle> {
        let mut lifecycle = self.lifecycle.lock();
        self.cancel(&mut lifecycle);
        self.shared.rng.reseed(seed);
        if log::log_enabled!(log::Level::Info) {
            info!("Replaying with seed {}", seed);
        }
        self.launch(&mut lifecycle)
    }

    /// Draw the next behaviour name without running anything
    pub fn draw(&self) -> MonkeyResult<String> {
        let registry = self.shared.registry.read();
        selector::select(&*registry, self.shared.rng.as_ref())
    }

    /// Run one complete tick inline and return its report
    ///
    /// The report is handed back to the caller instead of the sink.
    pub async fn step(&self) -> TickReport<T> {
        let tick = self.shared.next_tick();
        match self.shared.begin(tick) {
            Ok(launched) => self.shared.settle(tick, launched).await,
            Err(report) => report,
        }
    }

    /// Wait until no launched execution is pending
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Current lifecycle state
    pub fn status(&self) -> RunStatus {
        match &*self.lifecycle.lock() {
            Lifecycle::Running { handle, task } if !task.is_finished() => RunStatus::Running(*handle),
            _ => RunStatus::Idle,
        }
    }

    /// Whether a tick loop is active
    pub fn is_running(&self) -> bool {
        matches!(self.status(), RunStatus::Running(_))
    }

    /// Seed of the current draw sequence
    pub fn seed(&self) -> Seed {
        self.shared.rng.seed()
    }

    /// Interval between ticks
    pub fn speed(&self) -> Duration {
        self.shared.speed
    }

    /// Locale actions are bound to
    pub fn locale(&self) -> &Locale {
        &self.shared.locale
    }

    /// Ticks issued so far, scheduled and stepped
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Executions launched by the tick loop and not settled yet
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Registered behaviour names, in canonical order
    pub fn behaviours(&self) -> Vec<String> {
        self.shared
            .registry
            .read()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn launch(&self, lifecycle: &mut Lifecycle) -> MonkeyResult<TaskHandle> {
        if self.shared.registry.read().is_empty() {
            return Err(MonkeyError::EmptyRegistry);
        }

        // Every run starts at the beginning of its seed's sequence, so the
        // record below is enough to replay it
        let seed = self.shared.rng.seed();
        self.shared.rng.reseed(seed);
        let run = self.runs.fetch_add(1, Ordering::AcqRel) + 1;
        let handle = TaskHandle { run, seed };

        eprintln!("Chaos monkey seed: {}", seed);
        eprintln!("   Replay: {}={} (or ChaosMonkey::replay)", SEED_ENV_VAR, seed);
        if log::log_enabled!(log::Level::Info) {
            info!(
                "Chaos monkey run #{} started: seed={}, speed={:?}, behaviours={}",
                run,
                seed,
                self.shared.speed,
                self.shared.registry.read().len()
            );
        }

        *self.shared.active_run.lock() = run;
        let task = tokio::spawn(Shared::run_loop(self.shared.clone(), run));
        *lifecycle = Lifecycle::Running { handle, task };
        Ok(handle)
    }

    fn cancel(&self, lifecycle: &mut Lifecycle) {
        if let Lifecycle::Running { handle, task } = std::mem::replace(lifecycle, Lifecycle::Idle) {
            // Close the gate first so a tick racing with abort() cannot draw
            *self.shared.active_run.lock() = 0;
            task.abort();
            if log::log_enabled!(log::Level::Info) {
                info!(
                    "Chaos monkey run #{} stopped after {} ticks ({} in flight)",
                    handle.run,
                    self.ticks(),
                    self.in_flight()
                );
            }
        }
    }
}

impl<T: Send + 'static> Default for ChaosMonkey<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ChaosMonkey<T> {
    fn drop(&mut self) {
        if let Lifecycle::Running { task, .. } = &*self.lifecycle.lock() {
            task.abort();
        }
    }
}

/// Builder for [`ChaosMonkey`]
///
/// # Example
///
/// ```rust
/// use tos_chaos_monkey::prelude::*;
///
/// let monkey: ChaosMonkey<()> = ChaosMonkey::builder()
///     .seed(Seed::new(7))
///     .speed_ms(20)
///     .locale("fr")
///     .pre_do(|| Ok(()))
///     .build()
///     .unwrap();
/// assert_eq!(monkey.seed(), Seed::new(7));
/// ```
pub struct ChaosMonkeyBuilder<T> {
    seed: Option<Seed>,
    speed: Duration,
    locale: Locale,
    pre_do: Option<PreHook>,
    post_do: Option<PostHook<T>>,
    sink: Option<Arc<dyn ReportSink<T>>>,
    rng: Option<Arc<dyn RandomSource>>,
}

impl<T: Send + 'static> ChaosMonkeyBuilder<T> {
    /// Builder with default settings
    pub fn new() -> Self {
        Self {
            seed: None,
            speed: Duration::from_millis(DEFAULT_SPEED_MS),
            locale: Locale::default(),
            pre_do: None,
            post_do: None,
            sink: None,
            rng: None,
        }
    }

    /// Fixed seed, random (or `TOS_MONKEY_SEED`) otherwise
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Interval between ticks
    pub fn speed(mut self, speed: Duration) -> Self {
        self.speed = speed;
        self
    }

    /// Interval between ticks, in milliseconds
    pub fn speed_ms(self, millis: u64) -> Self {
        self.speed(Duration::from_millis(millis))
    }

    /// Locale actions are bound to
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Locale::new(locale);
        self
    }

    /// Hook run before every precondition
    pub fn pre_do<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pre_do = Some(Arc::new(f));
        self
    }

    /// Hook run with the action result before every postcondition
    pub fn post_do<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.post_do = Some(Arc::new(f));
        self
    }

    /// Destination of tick reports, [`LogSink`] by default
    pub fn sink<S>(mut self, sink: S) -> Self
    where
        S: ReportSink<T> + 'static,
    {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Replace the seeded engine, e.g. with a scripted source in tests
    ///
    /// A seed set on the builder reseeds the given source.
    pub fn random_source(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Apply a configuration
    ///
    /// # Errors
    ///
    /// `InvalidSeed` or `InvalidConfig` for out-of-range values.
    pub fn with_config(mut self, config: &MonkeyConfig) -> MonkeyResult<Self> {
        if let Some(seed) = config.seed()? {
            self.seed = Some(seed);
        }
        self.speed = config.speed()?;
        self.locale = config.locale()?;
        Ok(self)
    }

    /// Build the monkey
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a zero speed or an empty locale.
    pub fn build(self) -> MonkeyResult<ChaosMonkey<T>> {
        if self.speed.is_zero() {
            return Err(MonkeyError::InvalidConfig(
                "speed must be positive".to_string(),
            ));
        }
        if self.locale.as_str().trim().is_empty() {
            return Err(MonkeyError::InvalidConfig(
                "locale must not be empty".to_string(),
            ));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> ChaosMonkey<T> {
        let rng: Arc<dyn RandomSource> = match (self.rng, self.seed) {
            (Some(rng), Some(seed)) => {
                rng.reseed(seed);
                rng
            }
            (Some(rng), None) => rng,
            (None, seed) => Arc::new(SeededRng::new(
                seed.unwrap_or_else(Seed::from_env_or_random),
            )),
        };

        ChaosMonkey {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::new()),
                rng,
                locale: self.locale,
                speed: self.speed,
                hooks: HookPipeline::new(
                    self.pre_do.unwrap_or_else(noop_pre),
                    self.post_do.unwrap_or_else(noop_post),
                ),
                sink: self.sink.unwrap_or_else(|| Arc::new(LogSink)),
                active_run: Mutex::new(0),
                ticks: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::Idle),
            runs: AtomicU64::new(0),
        }
    }
}

impl<T: Send + 'static> Default for ChaosMonkeyBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
