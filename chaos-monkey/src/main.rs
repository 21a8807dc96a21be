// TOS Chaos Monkey Demo
//
// Purpose: Run the monkey against an in-memory ledger and check that random
// deposits, withdrawals and transfers never break supply conservation.
//
// Features:
// - Seeded, replayable runs (seed printed at start)
// - JSON config file with CLI overrides
// - Per-behaviour summary at the end of the run
//
// Usage:
//   cargo run --bin tos-chaos-monkey -- --seed 42 --speed-ms 20 --duration-secs 5

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tos_chaos_monkey::arbitrary::{action, ActionContext};
use tos_chaos_monkey::orchestrator::parse_seed;
use tos_chaos_monkey::registry::BehaviourOptions;
use tos_chaos_monkey::report::{LogSink, ReportSink, TickReport};
use tos_chaos_monkey::{ChaosMonkey, MonkeyConfig, Seed};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tos-chaos-monkey")]
#[command(about = "Run seeded random operations against an in-memory ledger", long_about = None)]
struct Args {
    /// Seed to run (decimal or 0x-prefixed hex), random when omitted
    #[arg(short, long, value_parser = parse_seed)]
    seed: Option<Seed>,

    /// Milliseconds between ticks
    #[arg(long)]
    speed_ms: Option<u64>,

    /// How long to run, in seconds
    #[arg(short, long, default_value_t = 3)]
    duration_secs: u64,

    /// Locale tag actions are bound to
    #[arg(short, long)]
    locale: Option<String>,

    /// JSON config file, CLI flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

// ============================================================================
// Ledger
// ============================================================================

const ACCOUNTS: [&str; 4] = ["alice", "bob", "carol", "dave"];
const INITIAL_BALANCE: u64 = 10_000;
const MAX_AMOUNT: u64 = 2_500;

/// Result of one ledger operation
#[derive(Debug, Clone)]
struct Receipt {
    amount: u64,
}

struct Ledger {
    balances: Mutex<BTreeMap<&'static str, u64>>,
    // Deposits minus withdrawals since genesis
    net_issued: AtomicI64,
}

impl Ledger {
    fn new() -> Self {
        Self {
            balances: Mutex::new(ACCOUNTS.iter().map(|a| (*a, INITIAL_BALANCE)).collect()),
            net_issued: AtomicI64::new(0),
        }
    }

    fn deposit(&self, account: &'static str, amount: u64) -> Result<Receipt> {
        let mut balances = self.balances.lock();
        let balance = balances
            .get_mut(account)
            .with_context(|| format!("Unknown account {}", account))?;
        *balance += amount;
        self.net_issued.fetch_add(amount as i64, Ordering::SeqCst);
        Ok(Receipt { amount })
    }

    fn withdraw(&self, account: &'static str, amount: u64) -> Result<Receipt> {
        let mut balances = self.balances.lock();
        let balance = balances
            .get_mut(account)
            .with_context(|| format!("Unknown account {}", account))?;
        if *balance < amount {
            anyhow::bail!(
                "Insufficient funds: {} has {}, needs {}",
                account,
                balance,
                amount
            );
        }
        *balance -= amount;
        self.net_issued.fetch_sub(amount as i64, Ordering::SeqCst);
        Ok(Receipt { amount })
    }

    fn transfer(&self, from: &'static str, to: &'static str, amount: u64) -> Result<Receipt> {
        let mut balances = self.balances.lock();
        let available = balances.get(from).copied().unwrap_or(0);
        if available < amount {
            anyhow::bail!("Insufficient funds: {} has {}, needs {}", from, available, amount);
        }
        if !balances.contains_key(to) {
            anyhow::bail!("Unknown account {}", to);
        }
        *balances.entry(from).or_default() -= amount;
        *balances.entry(to).or_default() += amount;
        Ok(Receipt { amount })
    }

    fn check_supply(&self) -> Result<()> {
        let balances = self.balances.lock();
        let total: u64 = balances.values().sum();
        let expected = INITIAL_BALANCE as i64 * ACCOUNTS.len() as i64
            + self.net_issued.load(Ordering::SeqCst);
        anyhow::ensure!(
            total as i64 == expected,
            "Supply mismatch: balances sum to {}, expected {}",
            total,
            expected
        );
        Ok(())
    }
}

fn pick_account(ctx: &ActionContext<'_>) -> &'static str {
    ACCOUNTS[ctx.rng.pick_index(ACCOUNTS.len()).unwrap_or(0)]
}

fn pick_amount(ctx: &ActionContext<'_>) -> u64 {
    ctx.rng.gen_range_u64(1, MAX_AMOUNT + 1).unwrap_or(1)
}

// ============================================================================
// Summary
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    completed: u64,
    failed: u64,
    volume: u64,
}

/// Logs every report and tallies outcomes per behaviour
#[derive(Default)]
struct SummarySink {
    tallies: Mutex<BTreeMap<String, Tally>>,
}

impl ReportSink<Receipt> for SummarySink {
    fn report(&self, report: TickReport<Receipt>) {
        {
            let mut tallies = self.tallies.lock();
            let tally = tallies
                .entry(report.behaviour.clone().unwrap_or_default())
                .or_default();
            match &report.outcome {
                Ok(receipt) => {
                    tally.completed += 1;
                    tally.volume += receipt.amount;
                }
                Err(_) => tally.failed += 1,
            }
        }
        LogSink.report(report);
    }
}

impl SummarySink {
    fn print_summary(&self, seed: Seed, ticks: u64, elapsed: Duration) {
        println!("\n{}", "=".repeat(70));
        println!("CHAOS MONKEY SUMMARY");
        println!("{}", "=".repeat(70));
        println!("Seed:           {}", seed);
        println!("Ticks:          {}", ticks);
        println!("Duration:       {:?}", elapsed);
        for (name, tally) in self.tallies.lock().iter() {
            println!(
                "  {:<10} completed={:<6} failed={:<6} volume={}",
                name, tally.completed, tally.failed, tally.volume
            );
        }
        println!("{}", "=".repeat(70));
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    let mut config = match &args.config {
        Some(path) => MonkeyConfig::load(path)?,
        None => MonkeyConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = Some(u32::from(seed) as u64);
    }
    if let Some(speed_ms) = args.speed_ms {
        config.speed_ms = speed_ms;
    }
    if let Some(locale) = &args.locale {
        config.locale = locale.clone();
    }

    let sink = Arc::new(SummarySink::default());
    let ledger = Arc::new(Ledger::new());

    let monkey: ChaosMonkey<Receipt> = ChaosMonkey::builder()
        .with_config(&config)?
        .sink(sink.clone())
        .post_do({
            let ledger = ledger.clone();
            move |_: &Receipt| ledger.check_supply()
        })
        .build()?;

    info!("TOS Chaos Monkey");
    info!("================");
    info!("  Seed:     {}", monkey.seed());
    info!("  Speed:    {:?}", monkey.speed());
    info!("  Locale:   {}", monkey.locale());
    info!("  Duration: {}s", args.duration_secs);

    register_ledger_behaviours(&monkey, &ledger)?;

    let started = Instant::now();
    monkey.start()?;
    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;
    monkey.stop();
    monkey.drain().await;

    ledger.check_supply().context("Ledger broken at the end of the run")?;
    sink.print_summary(monkey.seed(), monkey.ticks(), started.elapsed());
    Ok(())
}

fn supply_check(ledger: &Arc<Ledger>) -> impl Fn(&Receipt) -> Result<()> + Send + Sync + 'static {
    let ledger = ledger.clone();
    move |_: &Receipt| ledger.check_supply()
}

fn register_ledger_behaviours(monkey: &ChaosMonkey<Receipt>, ledger: &Arc<Ledger>) -> Result<()> {
    let target = ledger.clone();
    monkey.behaviour(
        "deposit",
        action(move |ctx: &ActionContext<'_>| {
            let (account, amount) = (pick_account(ctx), pick_amount(ctx));
            let ledger = target.clone();
            async move {
                tokio::task::yield_now().await;
                ledger.deposit(account, amount)
            }
        }),
        BehaviourOptions::new().postcondition(supply_check(ledger)),
    )?;

    let target = ledger.clone();
    monkey.behaviour(
        "withdraw",
        action(move |ctx: &ActionContext<'_>| {
            let (account, amount) = (pick_account(ctx), pick_amount(ctx));
            let ledger = target.clone();
            async move {
                tokio::task::yield_now().await;
                ledger.withdraw(account, amount)
            }
        }),
        BehaviourOptions::new().postcondition(supply_check(ledger)),
    )?;

    let target = ledger.clone();
    let guard = ledger.clone();
    monkey.behaviour(
        "transfer",
        action(move |ctx: &ActionContext<'_>| {
            let (from, to, amount) = (pick_account(ctx), pick_account(ctx), pick_amount(ctx));
            let ledger = target.clone();
            async move {
                tokio::task::yield_now().await;
                ledger.transfer(from, to, amount)
            }
        }),
        BehaviourOptions::new()
            .precondition(move || guard.check_supply())
            .postcondition(supply_check(ledger)),
    )?;

    Ok(())
}
