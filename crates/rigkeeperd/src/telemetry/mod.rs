//! Telemetry Poller - periodic status polling into reports
//!
//! Rules:
//! - At most one request in flight; a tick that finds one running is dropped
//! - A failed poll is skipped silently; the previous report stands
//! - A report is published whole or not at all
//! - Results of polls that finish after `stop()` are discarded
//! - Stopping resets the report to the idle state from the configured identity
//! - Process-table scans run on the blocking pool

pub mod cpu;
pub mod source;

pub use cpu::{cpu_load_percent, CpuLoadTracker, ProcessClock, SystemProcessClock};
pub use source::{HttpSourceFactory, HttpStatusSource, SourceFactory, StatusSource, TelemetryError};

use chrono::Utc;
use rigkeeper_common::{translate, Report, SettingsHandle, StatusDocument, UNKNOWN_F64};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Outcome of asking for a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTrigger {
    Started,
    /// A request was already in flight, or polling is stopped
    Dropped,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PollerState {
    in_flight: AtomicBool,
    generation: AtomicU64,
    source: Mutex<Option<Arc<dyn StatusSource>>>,
    tracker: Arc<Mutex<CpuLoadTracker>>,
    latest: Mutex<Option<Arc<Report>>>,
    reports: mpsc::UnboundedSender<Arc<Report>>,
}

/// Clears the in-flight flag when a poll task ends, however it ends
struct InFlightGuard(Arc<PollerState>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

impl PollerState {
    fn trigger(self: &Arc<Self>) -> PollTrigger {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Telemetry poll still in flight, dropping tick");
            return PollTrigger::Dropped;
        }
        let guard = InFlightGuard(self.clone());

        let Some(source) = lock(&self.source).clone() else {
            return PollTrigger::Dropped;
        };
        let generation = self.generation.load(Ordering::SeqCst);
        let state = self.clone();

        tokio::spawn(async move {
            let _guard = guard;
            match source.fetch().await {
                Ok(doc) => state.publish(generation, &doc).await,
                Err(e) => debug!("Skipping telemetry tick: {}", e),
            }
        });
        PollTrigger::Started
    }

    async fn publish(&self, generation: u64, doc: &StatusDocument) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding telemetry from a stopped run");
            return;
        }

        let tracker = self.tracker.clone();
        let cpu_load = tokio::task::spawn_blocking(move || lock(&tracker).sample())
            .await
            .unwrap_or(UNKNOWN_F64);
        let report = Arc::new(translate(doc, cpu_load, Utc::now()));

        let mut latest = lock(&self.latest);
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        *latest = Some(report.clone());
        let _ = self.reports.send(report);
    }
}

/// Telemetry poller for one worker at a time
pub struct TelemetryPoller {
    state: Arc<PollerState>,
    interval: Duration,
    settings: SettingsHandle,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryPoller {
    pub fn new(
        interval: Duration,
        clock: Box<dyn ProcessClock>,
        settings: SettingsHandle,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<Report>>) {
        Self::with_tracker(interval, CpuLoadTracker::new(clock), settings)
    }

    pub fn with_tracker(
        interval: Duration,
        tracker: CpuLoadTracker,
        settings: SettingsHandle,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<Report>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = Self {
            state: Arc::new(PollerState {
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                source: Mutex::new(None),
                tracker: Arc::new(Mutex::new(tracker)),
                latest: Mutex::new(None),
                reports: tx,
            }),
            interval,
            settings,
            timer: Mutex::new(None),
        };
        (poller, rx)
    }

    /// Baseline the worker's process tree and start the timer
    pub fn start(&self, source: Arc<dyn StatusSource>, worker_pid: Option<u32>) {
        self.halt_timer();
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.state.source) = Some(source);
        lock(&self.state.tracker).clear();
        if let Some(pid) = worker_pid {
            let state = self.state.clone();
            tokio::task::spawn_blocking(move || {
                let mut tracker = lock(&state.tracker);
                // A stop or restart since then owns the tracker now
                if state.generation.load(Ordering::SeqCst) == generation {
                    tracker.reseed(pid);
                }
            });
        }

        let state = self.state.clone();
        let period = self.interval;
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                state.trigger();
            }
        });
        *lock(&self.timer) = Some(timer);

        info!("Telemetry polling every {:?} (worker {:?})", period, worker_pid);
    }

    /// Poll now unless a request is already in flight
    pub fn trigger(&self) -> PollTrigger {
        self.state.trigger()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.timer).is_some()
    }

    fn halt_timer(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }
    }

    /// Halt polling and reset the report to its idle state
    pub async fn stop(&self) -> Arc<Report> {
        self.halt_timer();
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state.source) = None;
        lock(&self.state.tracker).clear();

        let idle = self.idle_report().await;
        *lock(&self.state.latest) = Some(idle.clone());
        idle
    }

    /// The idle report: configured identity, known devices with reset readings
    pub async fn idle_report(&self) -> Arc<Report> {
        let identity = self.settings.identity().await;
        let latest = lock(&self.state.latest).clone();
        Arc::new(match latest {
            Some(report) => report.to_idle(&identity),
            None => Report::idle(&identity),
        })
    }

    /// The authoritative report
    pub fn latest(&self) -> Option<Arc<Report>> {
        lock(&self.state.latest).clone()
    }
}

impl Drop for TelemetryPoller {
    fn drop(&mut self) {
        self.halt_timer();
    }
}
