//! Tick Loop (C10): invokes the Orchestrator on a fixed cadence with
//! error-recovery semantics. Never terminates under normal operation; on
//! an uncaught tick error it logs, sleeps briefly, and continues. Checks
//! a shutdown flag between ticks (never mid-tick) so a signal never
//! leaves a tick half-committed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::orchestrator::Orchestrator;
use crate::reporter::Reporter;
use crate::types::TickOutcome;

/// Shared flag a signal handler sets to request a clean exit at the next
/// iteration boundary.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Constructs a fresh `Orchestrator`, discarding any transient caches
/// (e.g. reopened HTTP sessions) -- invoked once at loop start and again
/// after every failed tick.
pub trait OrchestratorFactory: Send {
    fn build(&self) -> Orchestrator;
}

/// Runs `sync()` on `tick_interval`, sleeping `error_backoff` and
/// rebuilding the Orchestrator after any error. Returns when `shutdown`
/// is set at an iteration boundary. A `sleep` hook is injected so tests
/// can run the loop without real wall-clock delays.
pub fn run(
    factory: &dyn OrchestratorFactory,
    tick_interval: Duration,
    error_backoff: Duration,
    shutdown: ShutdownFlag,
    reporter: Arc<Mutex<dyn Reporter + Send>>,
    sleep: impl Fn(Duration),
    max_ticks: Option<usize>,
) -> Vec<Result<TickOutcome, String>> {
    let mut history = Vec::new();
    let mut orchestrator = factory.build();
    let mut ticks = 0usize;

    loop {
        if shutdown.is_set() {
            reporter.lock().unwrap().info("shutdown requested, exiting tick loop");
            break;
        }

        match orchestrator.sync() {
            Ok(outcome) => {
                reporter.lock().unwrap().info(&format!(
                    "tick complete: {} new, {} updated, {} deleted, {} unchanged",
                    outcome.new_count, outcome.updated_count, outcome.deleted_count, outcome.unchanged_count
                ));
                history.push(Ok(outcome));
                sleep(tick_interval);
            }
            Err(e) => {
                reporter.lock().unwrap().error(&format!("tick failed: {e}"));
                history.push(Err(e.to_string()));
                orchestrator = factory.build();
                sleep(error_backoff);
            }
        }

        ticks += 1;
        if let Some(max) = max_ticks {
            if ticks >= max {
                break;
            }
        }
    }

    history
}
