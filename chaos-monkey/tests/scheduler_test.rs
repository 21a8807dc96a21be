//! Scheduler integration tests
//!
//! Lifecycle, resilience and hook ordering of the tick loop, run on paused
//! Tokio time so every tick lands at an exact instant.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};
use tos_chaos_monkey::prelude::*;

type Trace = Arc<Mutex<Vec<String>>>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn drain_reports<T>(rx: &mut UnboundedReceiver<TickReport<T>>) -> Vec<TickReport<T>> {
    let mut reports = Vec::new();
    while let Ok(report) = rx.try_recv() {
        reports.push(report);
    }
    reports.sort_by_key(|r| r.tick);
    reports
}

fn channel_monkey<T: Send + 'static>(
    seed: u32,
    speed_ms: u64,
) -> (ChaosMonkey<T>, UnboundedReceiver<TickReport<T>>) {
    let (sink, rx) = ChannelSink::channel();
    let monkey = ChaosMonkey::builder()
        .seed(Seed::new(seed))
        .speed_ms(speed_ms)
        .sink(sink)
        .build()
        .unwrap();
    (monkey, rx)
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_behaviour() {
    init_logger();
    let (monkey, _rx) = channel_monkey::<u32>(1, 10);

    let err = assert_err!(monkey.start());
    assert!(matches!(err, MonkeyError::EmptyRegistry));
    let err = assert_err!(monkey.replay(Seed::new(1)));
    assert!(matches!(err, MonkeyError::EmptyRegistry));
    assert!(!monkey.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_is_idempotent() {
    init_logger();
    let (monkey, mut rx) = channel_monkey::<u32>(7, 10);
    assert_ok!(monkey.behaviour("tick", just(1u32), BehaviourOptions::new()));

    // Stopping an idle monkey is a no-op
    monkey.stop();
    monkey.stop();

    let first = assert_ok!(monkey.start());
    let second = assert_ok!(monkey.start());
    assert_ne!(first, second);
    assert_eq!(monkey.status(), RunStatus::Running(second));

    tokio::time::sleep(Duration::from_millis(55)).await;
    monkey.stop();
    monkey.stop();
    monkey.drain().await;

    // A single loop ran: one report per period, not two
    let reports = drain_reports(&mut rx);
    assert_eq!(reports.len(), 5);
    assert_eq!(monkey.ticks(), 5);
    assert_eq!(monkey.status(), RunStatus::Idle);

    // Nothing ticks once stopped
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(monkey.ticks(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_failing_action_keeps_loop_running() {
    init_logger();
    let (monkey, mut rx) = channel_monkey::<u32>(3, 10);
    assert_ok!(monkey.behaviour(
        "broken",
        action(|_: &ActionContext<'_>| async { Err::<u32, _>(anyhow::anyhow!("always fails")) }),
        BehaviourOptions::new(),
    ));

    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(105)).await;
    assert!(monkey.is_running());
    monkey.stop();
    monkey.drain().await;

    let reports = drain_reports(&mut rx);
    assert_eq!(reports.len(), 10);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.tick, i as u64 + 1);
        assert_eq!(report.behaviour.as_deref(), Some("broken"));
        match report.error() {
            Some(MonkeyError::ActionExecutionFailed { behaviour, source }) => {
                assert_eq!(behaviour, "broken");
                assert!(source.to_string().contains("always fails"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_precondition_skips_action() {
    init_logger();
    let launched = Arc::new(Mutex::new(0u32));
    let (monkey, mut rx) = channel_monkey::<u32>(3, 10);
    let counter = launched.clone();
    assert_ok!(monkey.behaviour(
        "guarded",
        action(move |_: &ActionContext<'_>| {
            *counter.lock() += 1;
            async { Ok(0u32) }
        }),
        BehaviourOptions::new().precondition(|| anyhow::bail!("not now")),
    ));

    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(35)).await;
    monkey.stop();
    monkey.drain().await;

    let reports = drain_reports(&mut rx);
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| matches!(
        r.error(),
        Some(MonkeyError::HookFailed {
            hook: HookKind::Precondition,
            ..
        })
    )));
    assert_eq!(*launched.lock(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_postcondition_does_not_stop_loop() {
    init_logger();
    let (monkey, mut rx) = channel_monkey::<u32>(11, 10);
    assert_ok!(monkey.behaviour(
        "fragile",
        just(4u32),
        BehaviourOptions::new().postcondition(|_: &u32| panic!("postcondition exploded")),
    ));

    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(45)).await;
    monkey.stop();
    monkey.drain().await;

    let reports = drain_reports(&mut rx);
    assert_eq!(reports.len(), 4);
    for report in &reports {
        let err = report.error().unwrap();
        assert!(err.to_string().contains("postcondition"));
        assert!(err.is_tick_failure());
    }
}

#[tokio::test(start_paused = true)]
async fn test_hook_order_around_execution() {
    init_logger();
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));

    let pre = trace.clone();
    let post = trace.clone();
    let monkey: ChaosMonkey<u32> = ChaosMonkey::builder()
        .seed(Seed::new(5))
        .pre_do(move || {
            pre.lock().push("global-pre".to_string());
            Ok(())
        })
        .post_do(move |value: &u32| {
            post.lock().push(format!("global-post({})", value));
            Ok(())
        })
        .build()
        .unwrap();

    let exec = trace.clone();
    let precond = trace.clone();
    let postcond = trace.clone();
    assert_ok!(monkey.behaviour(
        "traced",
        action(move |_: &ActionContext<'_>| {
            let exec = exec.clone();
            async move {
                exec.lock().push("action".to_string());
                Ok(7u32)
            }
        }),
        BehaviourOptions::new()
            .precondition(move || {
                precond.lock().push("precond".to_string());
                Ok(())
            })
            .postcondition(move |value: &u32| {
                postcond.lock().push(format!("postcond({})", value));
                Ok(())
            }),
    ));

    let report = monkey.step().await;
    assert_eq!(assert_ok!(report.outcome), 7);
    assert_eq!(
        *trace.lock(),
        vec![
            "global-pre",
            "precond",
            "action",
            "global-post(7)",
            "postcond(7)"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_behaviour_registered_while_running_gets_picked() {
    init_logger();
    let (monkey, mut rx) = channel_monkey::<&'static str>(21, 10);
    assert_ok!(monkey.behaviour("early", just("early"), BehaviourOptions::new()));

    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_ok!(monkey.behaviour("late", just("late"), BehaviourOptions::new()));
    assert_eq!(monkey.behaviours(), vec!["early", "late"]);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    monkey.stop();
    monkey.drain().await;

    let reports = drain_reports(&mut rx);
    assert!(reports[..2]
        .iter()
        .all(|r| r.behaviour.as_deref() == Some("early")));
    assert!(reports
        .iter()
        .any(|r| r.behaviour.as_deref() == Some("late")));
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_executions_finish_after_stop() {
    init_logger();
    let (monkey, mut rx) = channel_monkey::<u32>(8, 10);
    assert_ok!(monkey.behaviour(
        "slow",
        action(|_: &ActionContext<'_>| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(1u32)
        }),
        BehaviourOptions::new(),
    ));

    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    monkey.stop();

    assert_eq!(monkey.in_flight(), 2);
    assert!(drain_reports(&mut rx).is_empty());

    monkey.drain().await;
    assert_eq!(monkey.in_flight(), 0);

    let reports = drain_reports(&mut rx);
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_ok()));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_executions() {
    init_logger();
    let (monkey, mut rx) = channel_monkey::<u32>(8, 10);
    assert_ok!(monkey.behaviour(
        "slow",
        action(|_: &ActionContext<'_>| async {
            tokio::time::sleep(Duration::from_millis(35)).await;
            Ok(1u32)
        }),
        BehaviourOptions::new(),
    ));

    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(47)).await;

    // Ticks at 10, 20, 30, 40; only the first one settled (at 45)
    assert_eq!(monkey.ticks(), 4);
    assert_eq!(monkey.in_flight(), 3);

    monkey.stop();
    monkey.drain().await;
    assert_eq!(drain_reports(&mut rx).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_monkey_stops_loop() {
    init_logger();
    let (monkey, mut rx) = channel_monkey::<u32>(2, 10);
    assert_ok!(monkey.behaviour("tick", just(1u32), BehaviourOptions::new()));
    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
    drop(monkey);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(drain_reports(&mut rx).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_reports_seed() {
    init_logger();
    let (monkey, _rx) = channel_monkey::<u32>(1234, 10);
    assert_ok!(monkey.behaviour("tick", just(1u32), BehaviourOptions::new()));

    let handle = monkey.start().unwrap();
    assert_eq!(handle.seed(), Seed::new(1234));

    let replayed = monkey.replay(Seed::new(99)).unwrap();
    assert_eq!(replayed.seed(), Seed::new(99));
    assert_eq!(monkey.seed(), Seed::new(99));
    assert!(replayed.run() > handle.run());
    monkey.stop();
}

/// Forwards to a channel, except for the first report which it panics on
struct PanicOnceSink {
    tripped: AtomicBool,
    inner: ChannelSink<u32>,
}

impl ReportSink<u32> for PanicOnceSink {
    fn report(&self, report: TickReport<u32>) {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("sink exploded on tick {}", report.tick);
        }
        self.inner.report(report);
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_sink_does_not_stop_loop() {
    init_logger();
    let (inner, mut rx) = ChannelSink::channel();
    let monkey: ChaosMonkey<u32> = ChaosMonkey::builder()
        .seed(Seed::new(13))
        .speed_ms(10)
        .sink(PanicOnceSink {
            tripped: AtomicBool::new(false),
            inner,
        })
        .build()
        .unwrap();
    // Refused before launch, so every report is delivered from the loop itself
    assert_ok!(monkey.behaviour(
        "refused",
        just(1u32),
        BehaviourOptions::new().precondition(|| anyhow::bail!("closed")),
    ));

    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(105)).await;
    assert!(monkey.is_running());
    assert_eq!(monkey.ticks(), 10);
    monkey.stop();
    monkey.drain().await;

    // Only the report the sink panicked on is lost
    let reports = drain_reports(&mut rx);
    assert_eq!(reports.len(), 9);
    assert_eq!(reports[0].tick, 2);
    assert!(reports.iter().all(|r| matches!(
        r.error(),
        Some(MonkeyError::HookFailed {
            hook: HookKind::Precondition,
            ..
        })
    )));
}

/// Valid engine whose index draws land one past the end of the set
struct OvershootingSource(SeededRng);

impl RandomSource for OvershootingSource {
    fn seed(&self) -> Seed {
        self.0.seed()
    }

    fn next_u32(&self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&self) -> u64 {
        self.0.next_u64()
    }

    fn pick_index(&self, len: usize) -> Option<usize> {
        (len > 0).then_some(len)
    }

    fn reseed(&self, seed: Seed) {
        self.0.reseed(seed)
    }
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_draw_is_reported() {
    init_logger();
    let (sink, mut rx) = ChannelSink::channel();
    let monkey: ChaosMonkey<u32> = ChaosMonkey::builder()
        .speed_ms(10)
        .sink(sink)
        .random_source(Arc::new(OvershootingSource(SeededRng::new(Seed::new(3)))))
        .build()
        .unwrap();
    assert_ok!(monkey.behaviour("only", just(1u32), BehaviourOptions::new()));

    monkey.start().unwrap();
    tokio::time::sleep(Duration::from_millis(35)).await;
    assert!(monkey.is_running());
    monkey.stop();
    monkey.drain().await;

    let reports = drain_reports(&mut rx);
    assert_eq!(reports.len(), 3);
    for report in &reports {
        assert_eq!(report.behaviour, None);
        let err = report.error().unwrap();
        assert!(matches!(err, MonkeyError::InvalidDraw { index: 1, len: 1 }));
        assert!(err.is_tick_failure());
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_start_replays_its_printed_seed() {
    init_logger();
    const NAMES: [&str; 4] = ["a", "b", "c", "d"];
    let (monkey, mut rx) = channel_monkey::<&'static str>(5, 10);
    for name in NAMES {
        assert_ok!(monkey.behaviour(name, just(name), BehaviourOptions::new()));
    }

    let mut runs = Vec::new();
    for _ in 0..2 {
        // Draws made outside a run must not shift the next one
        for _ in 0..5 {
            assert_ok!(monkey.draw());
        }
        let handle = monkey.start().unwrap();
        assert_eq!(handle.seed(), Seed::new(5));
        tokio::time::sleep(Duration::from_millis(55)).await;
        monkey.stop();
        monkey.drain().await;

        let picked: Vec<String> = drain_reports(&mut rx)
            .into_iter()
            .filter_map(|r| r.behaviour)
            .collect();
        assert_eq!(picked.len(), 5);
        runs.push(picked);
    }

    let (fresh, _rx) = channel_monkey::<&'static str>(5, 10);
    for name in NAMES {
        assert_ok!(fresh.behaviour(name, just(name), BehaviourOptions::new()));
    }
    let expected: Vec<String> = (0..5).map(|_| fresh.draw().unwrap()).collect();
    assert_eq!(runs[0], expected);
    assert_eq!(runs[1], expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_does_not_wait_for_running_hook() {
    init_logger();
    let slot: Arc<OnceLock<Weak<ChaosMonkey<u32>>>> = Arc::new(OnceLock::new());
    let entered = Arc::new(Notify::new());
    let seen: Arc<Mutex<Option<RunStatus>>> = Arc::new(Mutex::new(None));
    let once = Arc::new(AtomicBool::new(false));

    let (hook_slot, hook_entered, hook_seen) = (slot.clone(), entered.clone(), seen.clone());
    let monkey: Arc<ChaosMonkey<u32>> = Arc::new(
        ChaosMonkey::builder()
            .seed(Seed::new(17))
            .speed_ms(10)
            .pre_do(move || {
                if once.swap(true, Ordering::SeqCst) {
                    return Ok(());
                }
                hook_entered.notify_one();
                // Give stop() the time to run while this hook is still busy
                std::thread::sleep(Duration::from_millis(50));
                if let Some(monkey) = hook_slot.get().and_then(Weak::upgrade) {
                    *hook_seen.lock() = Some(monkey.status());
                }
                Ok(())
            })
            .build()
            .unwrap(),
    );
    slot.set(Arc::downgrade(&monkey)).unwrap();
    assert_ok!(monkey.behaviour("tick", just(1u32), BehaviourOptions::new()));

    monkey.start().unwrap();
    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("hook never ran");

    let stopper = monkey.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        tokio::task::spawn_blocking(move || stopper.stop()),
    )
    .await
    .expect("stop blocked on the hook")
    .unwrap();
    assert!(!monkey.is_running());

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("hook never finished");
    assert_eq!(*seen.lock(), Some(RunStatus::Idle));
}
