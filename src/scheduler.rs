//! Fixed-interval cycle scheduling.
//!
//! A timer thread offers a tick to a single worker thread every interval
//! over a zero-capacity channel. The hand-off only succeeds when the worker
//! is idle and waiting, so a tick that fires mid-cycle is dropped instead of
//! queued, and the timer itself never blocks on a slow cycle.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cycle::{Orchestrator, TickOutcome};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the timer and wait for the in-flight cycle, if any, to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(timer) = self.timer.take() {
            timer
                .join()
                .map_err(|_| anyhow!("scheduler timer thread panicked"))?;
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("scheduler worker thread panicked"))?;
        }
        Ok(())
    }
}

pub struct Scheduler {
    interval: Duration,
    on_tick: Option<Box<dyn Fn(&TickOutcome) + Send>>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            on_tick: None,
        }
    }

    /// Observe every tick the worker runs.
    pub fn on_tick(mut self, f: impl Fn(&TickOutcome) + Send + 'static) -> Self {
        self.on_tick = Some(Box::new(f));
        self
    }

    /// Start ticking. The first tick fires immediately.
    pub fn spawn(self, orchestrator: Arc<Orchestrator>) -> Result<SchedulerHandle> {
        if self.interval.is_zero() {
            return Err(anyhow!("scheduler interval must be greater than zero"));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::sync_channel::<()>(0);

        let on_tick = self.on_tick;
        let worker = std::thread::Builder::new()
            .name("active-streams-cycle".to_string())
            .spawn(move || {
                while rx.recv().is_ok() {
                    let outcome = orchestrator.tick();
                    if let Some(f) = &on_tick {
                        f(&outcome);
                    }
                }
            })?;

        let interval = self.interval;
        let shutdown_timer = shutdown.clone();
        let timer = std::thread::Builder::new()
            .name("active-streams-timer".to_string())
            .spawn(move || run_timer(tx, interval, shutdown_timer))?;

        log::info!("scheduler started (interval: {}s)", interval.as_secs_f64());
        Ok(SchedulerHandle {
            shutdown,
            timer: Some(timer),
            worker: Some(worker),
        })
    }
}

fn run_timer(tx: mpsc::SyncSender<()>, interval: Duration, shutdown: Arc<AtomicBool>) {
    // The first tick waits for the worker to reach recv().
    if tx.send(()).is_err() {
        log::warn!("cycle worker exited; stopping timer");
        return;
    }
    let mut next = Instant::now() + interval;
    loop {
        while Instant::now() < next {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(SHUTDOWN_POLL.min(next.saturating_duration_since(Instant::now())));
        }
        next += interval;
        match tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                log::debug!("cycle still running; dropping tick");
            }
            Err(TrySendError::Disconnected(())) => {
                log::warn!("cycle worker exited; stopping timer");
                return;
            }
        }
    }
}
