//! Process Supervisor - owns the worker child process
//!
//! Rules:
//! - One worker run at a time; a new run clears the rolling log
//! - Start succeeds only if the worker is still alive after a short probe
//! - A watchdog polls liveness and reports the exit even if nobody waits on it
//! - Stop escalates: graceful step, bounded wait, then force kill
//! - A forced kill counts as a failed stop
//! - Each run reports its exit exactly once
//! - stdout/stderr lines pass through one lock, so log order is production order

pub mod launch;
pub mod signal;

pub use launch::LaunchSpec;
pub use signal::{platform_signaller, PortableSignaller, ProcessSignaller, StopMethod};
#[cfg(unix)]
pub use signal::UnixSignaller;
#[cfg(windows)]
pub use signal::WindowsSignaller;

use async_trait::async_trait;
use rigkeeper_common::{LogBuffer, LogEvent, SupervisionConfig};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Poll period while waiting for the worker to exit
const EXIT_POLL: Duration = Duration::from_millis(100);

/// Wait after a force kill before giving up on reaping
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// The seam the supervision controller drives
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Start a run; `true` if the worker is alive after the liveness probe
    async fn start(&self, spec: &LaunchSpec) -> bool;

    /// Stop the current run; `true` only for a graceful exit
    async fn stop(&self) -> bool;

    fn clear_logs(&self);

    fn pid(&self) -> Option<u32>;

    async fn is_running(&self) -> bool;
}

/// Exit of one worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub pid: u32,
    /// Exit code, `None` when killed by a signal or unknown
    pub code: Option<i32>,
}

/// Supervision timings
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub max_log_lines: usize,
    pub watchdog_interval: Duration,
    pub stop_timeout: Duration,
    pub liveness_probe: Duration,
}

impl SupervisorOptions {
    pub fn from_config(config: &SupervisionConfig) -> Self {
        Self {
            max_log_lines: config.max_log_lines,
            watchdog_interval: config.watchdog_interval(),
            stop_timeout: config.stop_timeout(),
            liveness_probe: config.liveness_probe(),
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_config(&SupervisionConfig::default())
    }
}

/// Receivers for supervisor output
#[derive(Debug)]
pub struct SupervisorChannels {
    pub logs: mpsc::UnboundedReceiver<LogEvent>,
    pub exits: mpsc::UnboundedReceiver<WorkerExit>,
}

fn lock_log(buffer: &Mutex<LogBuffer>) -> MutexGuard<'_, LogBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rolling log plus its event stream
#[derive(Debug, Clone)]
struct LogSink {
    buffer: Arc<Mutex<LogBuffer>>,
    events: mpsc::UnboundedSender<LogEvent>,
}

impl LogSink {
    fn push(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let mut buffer = lock_log(&self.buffer);
        if let Some(update) = buffer.push(line) {
            let _ = self.events.send(LogEvent::Appended(update));
        }
    }

    fn clear(&self) {
        let mut buffer = lock_log(&self.buffer);
        buffer.clear();
        let _ = self.events.send(LogEvent::Cleared);
    }
}

/// Exit bookkeeping shared by the watchdog and `stop`
#[derive(Debug, Clone)]
struct ExitReporter {
    pid: u32,
    reported: Arc<AtomicBool>,
    exits: mpsc::UnboundedSender<WorkerExit>,
    signaller: Arc<dyn ProcessSignaller>,
}

impl ExitReporter {
    fn is_reported(&self) -> bool {
        self.reported.load(Ordering::SeqCst)
    }

    fn report(&self, code: Option<i32>) {
        if self.reported.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Worker {} exited (code {:?})", self.pid, code);

        // Sweep children left behind in the worker's group
        match self.signaller.sweep(self.pid) {
            Ok(true) => debug!("Killed leftover processes of worker group {}", self.pid),
            Ok(false) => {}
            Err(e) => debug!("Could not sweep worker group {}: {}", self.pid, e),
        }

        let _ = self.exits.send(WorkerExit { pid: self.pid, code });
    }
}

struct Run {
    child: Arc<tokio::sync::Mutex<Child>>,
    reporter: ExitReporter,
    watchdog: JoinHandle<()>,
}

/// Worker process supervisor
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    signaller: Arc<dyn ProcessSignaller>,
    log: LogSink,
    exits: mpsc::UnboundedSender<WorkerExit>,
    run: tokio::sync::Mutex<Option<Run>>,
    pid: AtomicU32,
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions, signaller: Arc<dyn ProcessSignaller>) -> (Self, SupervisorChannels) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            log: LogSink {
                buffer: Arc::new(Mutex::new(LogBuffer::new(options.max_log_lines))),
                events: log_tx,
            },
            options,
            signaller,
            exits: exit_tx,
            run: tokio::sync::Mutex::new(None),
            pid: AtomicU32::new(0),
        };

        (
            supervisor,
            SupervisorChannels {
                logs: log_rx,
                exits: exit_rx,
            },
        )
    }

    /// Current log text
    pub fn log_text(&self) -> String {
        lock_log(&self.log.buffer).text().to_string()
    }

    fn build_command(spec: &LaunchSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own group so interrupts and kills reach the worker's children
        #[cfg(unix)]
        command.process_group(0);

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        command
    }

    fn spawn_reader<R>(&self, stream: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sink = self.log.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.push(&line);
            }
        });
    }

    fn spawn_watchdog(&self, child: Arc<tokio::sync::Mutex<Child>>, reporter: ExitReporter) -> JoinHandle<()> {
        let period = self.options.watchdog_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if reporter.is_reported() {
                    break;
                }
                let status = child.lock().await.try_wait();
                match status {
                    Ok(Some(status)) => {
                        debug!("Watchdog saw worker {} exit", reporter.pid);
                        reporter.report(status.code());
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("[!] Watchdog lost track of worker {}: {}", reporter.pid, e);
                        reporter.report(None);
                        break;
                    }
                }
            }
        })
    }

    /// Poll until the child exits or `timeout` passes
    async fn wait_for_exit(child: &tokio::sync::Mutex<Child>, timeout: Duration) -> Option<Option<i32>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match child.lock().await.try_wait() {
                Ok(Some(status)) => return Some(status.code()),
                Ok(None) => {}
                Err(_) => return Some(None),
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }

    async fn force_kill(&self, run: &Run) -> Option<i32> {
        let pid = run.reporter.pid;
        if let Err(e) = self.signaller.signal(pid, StopMethod::ForceKill) {
            debug!("Group kill of {} unavailable ({}), killing the child", pid, e);
            if let Err(e) = run.child.lock().await.start_kill() {
                warn!("[!] Failed to kill worker {}: {}", pid, e);
            }
        }
        Self::wait_for_exit(&run.child, KILL_REAP_TIMEOUT).await.flatten()
    }
}

#[async_trait]
impl WorkerHost for ProcessSupervisor {
    async fn start(&self, spec: &LaunchSpec) -> bool {
        let mut slot = self.run.lock().await;
        if let Some(run) = slot.as_ref() {
            if !run.reporter.is_reported() {
                warn!("[!] Worker {} is already running", run.reporter.pid);
                return false;
            }
        }
        if let Some(old) = slot.take() {
            old.watchdog.abort();
        }

        self.log.clear();

        if let Err(e) = spec.run_prelaunch().await {
            warn!("[!] Pre-launch script failed: {:#}", e);
        }

        let mut child = match Self::build_command(spec).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    "[!] Failed to start {} in {}: {}",
                    spec.program,
                    spec.working_dir.display(),
                    e
                );
                return false;
            }
        };
        let Some(pid) = child.id() else {
            warn!("[!] Worker exited before its pid was known");
            return false;
        };

        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr);
        }

        tokio::task::yield_now().await;
        tokio::time::sleep(self.options.liveness_probe).await;

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                warn!("[!] Worker {} exited during startup ({})", pid, status);
                return false;
            }
            Err(e) => {
                warn!("[!] Could not check worker {}: {}", pid, e);
                return false;
            }
        }

        let child = Arc::new(tokio::sync::Mutex::new(child));
        let reporter = ExitReporter {
            pid,
            reported: Arc::new(AtomicBool::new(false)),
            exits: self.exits.clone(),
            signaller: self.signaller.clone(),
        };
        let watchdog = self.spawn_watchdog(child.clone(), reporter.clone());

        self.pid.store(pid, Ordering::SeqCst);
        *slot = Some(Run {
            child,
            reporter,
            watchdog,
        });

        info!("Worker started (pid {})", pid);
        true
    }

    async fn stop(&self) -> bool {
        let Some(run) = self.run.lock().await.take() else {
            return true;
        };
        run.watchdog.abort();
        self.pid.store(0, Ordering::SeqCst);
        let pid = run.reporter.pid;

        if run.reporter.is_reported() {
            return true;
        }
        if let Some(code) = Self::wait_for_exit(&run.child, Duration::ZERO).await {
            run.reporter.report(code);
            return true;
        }

        if let Some(method) = self.signaller.graceful_method(pid) {
            info!("Stopping worker {} ({})", pid, method);
            match self.signaller.signal(pid, method) {
                Ok(()) => {
                    let exited = Self::wait_for_exit(&run.child, self.options.stop_timeout).await;
                    self.signaller.release(pid, method);
                    if let Some(code) = exited {
                        run.reporter.report(code);
                        return true;
                    }
                }
                Err(e) => warn!("[!] {} failed for worker {}: {}", method, pid, e),
            }
        }

        warn!("[!] Worker {} did not stop gracefully, killing", pid);
        let code = self.force_kill(&run).await;
        run.reporter.report(code);
        false
    }

    fn clear_logs(&self) {
        self.log.clear();
    }

    fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    async fn is_running(&self) -> bool {
        let slot = self.run.lock().await;
        match slot.as_ref() {
            Some(run) if !run.reporter.is_reported() => {
                matches!(run.child.lock().await.try_wait(), Ok(None))
            }
            _ => false,
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.watchdog.abort();
        }
    }
}
