//! Supervision Controller - run state machine for the worker
//!
//! Rules:
//! - One dispatcher loop owns the run state and the settings working copy
//! - Idle -> Starting -> Running -> Stopping -> Idle
//! - CooldownRelaunch is entered only after an unexpected exit while a run
//!   is requested; a manual stop or a settings save suppresses it
//! - Endpoint problems abort a launch; advisories go through the gate
//! - The launch sequence runs as its own task, so stop and shutdown are
//!   served while it waits; a worker it started after cancellation is stopped
//! - Starting becomes Running on the first report; no report within the
//!   grace window stops the worker
//! - Telemetry stops before the worker does

use crate::advisory::{collect_advisories, Advisory, AdvisoryGate, ConnectivityProbe};
use crate::settings_watcher::SettingsChanged;
use crate::supervisor::{LaunchSpec, WorkerExit, WorkerHost};
use crate::telemetry::{SourceFactory, StatusSource, TelemetryPoller};
use anyhow::{anyhow, Context, Result};
use rigkeeper_common::{
    edit_leaf, load_settings, merge_into, normalize_tree, resolve_endpoint, save_settings,
    verify_bindable, ConfigPath, ConfigTreeError, ConfigValue, LogEvent, MergeStats, Report,
    RigkeeperConfig, SettingsHandle, StatusEndpoint, WorkerConfig,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Starting,
    Running,
    Stopping,
    CooldownRelaunch,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::CooldownRelaunch => "cooldown",
        })
    }
}

/// Operator requests
#[derive(Debug)]
pub enum Command {
    Launch,
    Stop,
    CancelRelaunch,
    ClearLogs,
    /// Replace one setting with free text, normalized to the persisted type
    EditSetting {
        path: ConfigPath,
        text: String,
        reply: oneshot::Sender<Result<(), ConfigTreeError>>,
    },
    SaveSettings {
        reply: oneshot::Sender<Result<()>>,
    },
    /// Carry a previously saved tree into the settings file's current schema
    ReconcileSettings {
        previous: ConfigValue,
        reply: oneshot::Sender<Result<MergeStats>>,
    },
    ReloadSettings,
    Shutdown,
}

/// Everything the controller reports, in the order it happened
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    State(ControllerState),
    Log(LogEvent),
    Report(Arc<Report>),
    Advisory { advisory: Advisory, accepted: bool },
    LaunchAborted(String),
    RelaunchScheduled { after: Duration },
    WorkerExited { code: Option<i32>, expected: bool },
    SettingsReloaded,
}

/// Cloneable front door to a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ControllerState>,
    shutdown: CancellationToken,
}

impl ControllerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Supervision controller is not running"))
    }

    pub fn launch(&self) -> Result<()> {
        self.send(Command::Launch)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn cancel_relaunch(&self) -> Result<()> {
        self.send(Command::CancelRelaunch)
    }

    pub fn clear_logs(&self) -> Result<()> {
        self.send(Command::ClearLogs)
    }

    pub fn reload_settings(&self) -> Result<()> {
        self.send(Command::ReloadSettings)
    }

    /// Edit one setting; a value that does not fit the persisted type is rejected
    pub async fn edit_setting(&self, path: ConfigPath, text: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EditSetting {
            path,
            text: text.to_string(),
            reply,
        })?;
        Ok(rx.await.context("Controller dropped the edit")??)
    }

    pub async fn save_settings(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SaveSettings { reply })?;
        rx.await.context("Controller dropped the save")?
    }

    pub async fn reconcile_settings(&self, previous: ConfigValue) -> Result<MergeStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ReconcileSettings { previous, reply })?;
        rx.await.context("Controller dropped the reconcile")?
    }

    /// Stop the worker and end the dispatcher loop
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        self.shutdown.cancel();
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }
}

/// The controller's collaborators and their event streams
pub struct Collaborators {
    pub host: Arc<dyn WorkerHost>,
    pub logs: mpsc::UnboundedReceiver<LogEvent>,
    pub exits: mpsc::UnboundedReceiver<WorkerExit>,
    pub poller: TelemetryPoller,
    pub reports: mpsc::UnboundedReceiver<Arc<Report>>,
    pub sources: Arc<dyn SourceFactory>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub gate: Arc<dyn AdvisoryGate>,
    /// Must be the handle the poller reads its identity from
    pub settings: SettingsHandle,
    pub settings_changes: Option<mpsc::UnboundedReceiver<SettingsChanged>>,
}

pub struct SupervisionController {
    config: RigkeeperConfig,
    settings_path: PathBuf,

    host: Arc<dyn WorkerHost>,
    logs: mpsc::UnboundedReceiver<LogEvent>,
    exits: mpsc::UnboundedReceiver<WorkerExit>,
    poller: TelemetryPoller,
    reports: mpsc::UnboundedReceiver<Arc<Report>>,
    sources: Arc<dyn SourceFactory>,
    probe: Arc<dyn ConnectivityProbe>,
    gate: Arc<dyn AdvisoryGate>,
    settings: SettingsHandle,
    settings_changes: Option<mpsc::UnboundedReceiver<SettingsChanged>>,

    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ControllerState>,
    events: mpsc::UnboundedSender<ControllerEvent>,
    shutdown: CancellationToken,

    working: Option<ConfigValue>,
    launching: Option<PendingLaunch>,
    worker_pid: Option<u32>,
    run_requested: bool,
    sticky_stop: bool,
    saving_settings: bool,
    grace_deadline: Option<Instant>,
    relaunch_at: Option<Instant>,
    last_stop_at: Option<Instant>,
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn launch_outcome(launching: &mut Option<PendingLaunch>) -> LaunchOutcome {
    match launching {
        Some(pending) => match (&mut pending.task).await {
            Ok(outcome) => outcome,
            Err(e) => LaunchOutcome::Aborted(format!("Launch task failed: {}", e)),
        },
        None => std::future::pending().await,
    }
}

async fn next_change(
    changes: &mut Option<mpsc::UnboundedReceiver<SettingsChanged>>,
) -> Option<SettingsChanged> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SupervisionController {
    pub fn new(
        config: RigkeeperConfig,
        parts: Collaborators,
    ) -> (Self, ControllerHandle, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ControllerState::Idle);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let handle = ControllerHandle {
            commands: command_tx,
            state: state_rx,
            shutdown: shutdown.clone(),
        };

        let controller = Self {
            settings_path: config.worker.settings_path(),
            config,
            host: parts.host,
            logs: parts.logs,
            exits: parts.exits,
            poller: parts.poller,
            reports: parts.reports,
            sources: parts.sources,
            probe: parts.probe,
            gate: parts.gate,
            settings: parts.settings,
            settings_changes: parts.settings_changes,
            commands: command_rx,
            state: state_tx,
            events: event_tx,
            shutdown,
            working: None,
            launching: None,
            worker_pid: None,
            run_requested: false,
            sticky_stop: false,
            saving_settings: false,
            grace_deadline: None,
            relaunch_at: None,
            last_stop_at: None,
        };

        (controller, handle, event_rx)
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ControllerState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        debug!("Controller {} -> {}", previous, next);
        self.state.send_replace(next);
        self.emit(ControllerEvent::State(next));
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    /// Dispatch until shutdown, then stop the worker
    pub async fn run(mut self) -> Result<()> {
        self.reload_settings().await;
        if self.config.supervision.auto_launch {
            self.launch().await;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                Some(event) = self.logs.recv() => self.emit(ControllerEvent::Log(event)),
                Some(exit) = self.exits.recv() => self.on_exit(exit).await,
                Some(report) = self.reports.recv() => self.on_report(report),
                outcome = launch_outcome(&mut self.launching) => self.on_launch_outcome(outcome).await,
                Some(changed) = next_change(&mut self.settings_changes) => {
                    debug!("Settings file changed: {}", changed.path.display());
                    self.reload_settings().await;
                }
                _ = deadline(self.grace_deadline) => self.on_grace_elapsed().await,
                _ = deadline(self.relaunch_at) => {
                    self.relaunch_at = None;
                    info!("Cooldown over, relaunching worker");
                    self.launch().await;
                }
            }
        }

        self.request_stop().await;
        if let Some(pending) = self.launching.take() {
            pending.cancel.cancel();
            let _ = pending.task.await;
        }
        info!("Supervision controller stopped");
        Ok(())
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Launch => self.launch().await,
            Command::Stop => self.request_stop().await,
            Command::CancelRelaunch => self.cancel_relaunch(),
            Command::ClearLogs => self.host.clear_logs(),
            Command::EditSetting { path, text, reply } => {
                let _ = reply.send(self.edit_setting(&path, &text).await);
            }
            Command::SaveSettings { reply } => {
                let _ = reply.send(self.save_working_copy().await);
            }
            Command::ReconcileSettings { previous, reply } => {
                let _ = reply.send(self.reconcile(&previous).await);
            }
            Command::ReloadSettings => self.reload_settings().await,
            Command::Shutdown => self.shutdown.cancel(),
        }
    }

    async fn launch(&mut self) {
        match self.state() {
            ControllerState::Idle | ControllerState::CooldownRelaunch => {}
            state => {
                debug!("Launch ignored while {}", state);
                return;
            }
        }

        // A cancelled launch may still be stopping the worker it started
        if let Some(previous) = self.launching.take() {
            previous.cancel.cancel();
            let _ = previous.task.await;
        }

        self.relaunch_at = None;
        self.run_requested = true;
        self.sticky_stop = false;
        self.saving_settings = false;
        self.set_state(ControllerState::Starting);

        let job = LaunchJob {
            worker: self.config.worker.clone(),
            settle_until: self
                .last_stop_at
                .map(|stopped_at| stopped_at + self.config.supervision.post_stop_settle()),
            host: self.host.clone(),
            sources: self.sources.clone(),
            probe: self.probe.clone(),
            gate: self.gate.clone(),
            settings: self.settings.clone(),
            events: self.events.clone(),
        };
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(job.run(cancel.clone()));
        self.launching = Some(PendingLaunch { task, cancel });
    }

    async fn on_launch_outcome(&mut self, outcome: LaunchOutcome) {
        let cancelled = match self.launching.take() {
            Some(pending) => pending.cancel.is_cancelled(),
            None => true,
        };

        match outcome {
            LaunchOutcome::Started { source, pid, endpoint } if !cancelled => {
                self.worker_pid = pid;
                self.poller.start(source, pid);
                self.grace_deadline = Some(Instant::now() + self.config.supervision.start_grace());
                info!("Worker started (pid {:?}), waiting for telemetry at {}", pid, endpoint);
            }
            LaunchOutcome::Started { pid, .. } => {
                info!("Launch was cancelled, stopping worker {:?}", pid);
                self.host.stop().await;
                self.last_stop_at = Some(Instant::now());
            }
            LaunchOutcome::Aborted(reason) if !cancelled => self.abort_launch(reason),
            LaunchOutcome::Aborted(reason) => debug!("Cancelled launch ended: {}", reason),
            LaunchOutcome::Cancelled => debug!("Launch cancelled before the worker started"),
        }
    }

    fn abort_launch(&mut self, reason: String) {
        warn!("[!] Launch aborted: {}", reason);
        self.run_requested = false;
        self.emit(ControllerEvent::LaunchAborted(reason));
        self.set_state(ControllerState::Idle);
    }

    fn on_report(&mut self, report: Arc<Report>) {
        match self.state() {
            ControllerState::Starting => {
                self.grace_deadline = None;
                info!("First status report received");
                self.set_state(ControllerState::Running);
            }
            ControllerState::Running => {}
            state => {
                debug!("Dropping report received while {}", state);
                return;
            }
        }
        self.emit(ControllerEvent::Report(report));
    }

    async fn on_grace_elapsed(&mut self) {
        self.grace_deadline = None;
        if self.state() != ControllerState::Starting {
            return;
        }

        let grace = self.config.supervision.start_grace();
        self.run_requested = false;
        self.emit(ControllerEvent::LaunchAborted(format!(
            "No status report within {}s",
            grace.as_secs()
        )));
        warn!("[!] No status report within {:?}, stopping worker", grace);
        self.stop_worker().await;
    }

    async fn on_exit(&mut self, exit: WorkerExit) {
        let current = self.worker_pid == Some(exit.pid);
        let expected = !current || self.sticky_stop || !self.run_requested;
        self.emit(ControllerEvent::WorkerExited {
            code: exit.code,
            expected,
        });
        if !current {
            debug!("Exit of previous run {} (code {:?})", exit.pid, exit.code);
            return;
        }

        self.worker_pid = None;
        self.grace_deadline = None;
        if !expected {
            warn!("[!] Worker {} exited unexpectedly (code {:?})", exit.pid, exit.code);
        }

        let idle = self.poller.stop().await;
        self.emit(ControllerEvent::Report(idle));
        self.host.stop().await;
        self.last_stop_at = Some(Instant::now());

        if !expected && self.config.supervision.auto_relaunch && !self.saving_settings {
            let after = self.config.supervision.cooldown();
            self.relaunch_at = Some(Instant::now() + after);
            self.set_state(ControllerState::CooldownRelaunch);
            self.emit(ControllerEvent::RelaunchScheduled { after });
            info!("Relaunching in {}s", after.as_secs());
        } else {
            self.run_requested = false;
            self.set_state(ControllerState::Idle);
        }
    }

    async fn request_stop(&mut self) {
        match self.state() {
            ControllerState::Idle => debug!("Worker is not running"),
            ControllerState::CooldownRelaunch => self.cancel_relaunch(),
            _ => {
                self.run_requested = false;
                self.stop_worker().await;
            }
        }
    }

    async fn stop_worker(&mut self) {
        self.sticky_stop = true;
        self.grace_deadline = None;
        self.relaunch_at = None;
        self.worker_pid = None;
        self.set_state(ControllerState::Stopping);

        let idle = self.poller.stop().await;
        self.emit(ControllerEvent::Report(idle));
        match &self.launching {
            // The launch task stops whatever it managed to start
            Some(pending) => {
                pending.cancel.cancel();
                info!("Launch cancelled");
            }
            None => {
                let graceful = self.host.stop().await;
                info!("Worker stopped (graceful: {})", graceful);
            }
        }
        self.last_stop_at = Some(Instant::now());
        self.set_state(ControllerState::Idle);
    }

    fn cancel_relaunch(&mut self) {
        if self.state() != ControllerState::CooldownRelaunch {
            return;
        }
        self.relaunch_at = None;
        self.run_requested = false;
        info!("Relaunch cancelled");
        self.set_state(ControllerState::Idle);
    }

    async fn edit_setting(&mut self, path: &ConfigPath, text: &str) -> Result<(), ConfigTreeError> {
        let persisted = self.settings.snapshot().await;
        let working = self
            .working
            .as_mut()
            .ok_or_else(|| ConfigTreeError::PathNotFound(path.to_string()))?;
        let reference = persisted.unwrap_or_else(|| working.clone());

        let value = edit_leaf(working, path, text, &reference)?;
        debug!("Setting '{}' = {}", path, value);
        Ok(())
    }

    async fn save_working_copy(&mut self) -> Result<()> {
        let mut working = self.working.clone().context("No settings loaded")?;
        let reference = self
            .settings
            .snapshot()
            .await
            .unwrap_or_else(|| working.clone());
        let count = normalize_tree(&mut working, &reference)?;

        self.persist(working).await?;
        info!("Saved {} settings to {}", count, self.settings_path.display());
        Ok(())
    }

    async fn reconcile(&mut self, previous: &ConfigValue) -> Result<MergeStats> {
        let mut fresh = load_settings(&self.settings_path)
            .await?
            .with_context(|| format!("No settings in {} to reconcile into", self.settings_path.display()))?;
        let stats = merge_into(previous, &mut fresh);

        self.persist(fresh).await?;
        info!(
            "Reconciled settings: {} copied, {} dropped, {} kept at default",
            stats.copied, stats.dropped, stats.defaulted
        );
        Ok(stats)
    }

    /// Write `tree` and make it both the persisted snapshot and the working copy
    async fn persist(&mut self, tree: ConfigValue) -> Result<()> {
        self.saving_settings = true;
        if let Err(e) = save_settings(&self.settings_path, &tree).await {
            self.saving_settings = false;
            return Err(e);
        }
        // The watcher clears the flag when it sees our write
        self.saving_settings = self.settings_changes.is_some();

        self.settings.replace(Some(tree.clone())).await;
        self.working = Some(tree);
        Ok(())
    }

    async fn reload_settings(&mut self) {
        let tree = match load_settings(&self.settings_path).await {
            Ok(tree) => tree,
            Err(e) => {
                warn!("[!] Failed to reload settings: {:#}", e);
                return;
            }
        };

        if tree.is_none() && self.working.is_some() && self.settings_path.exists() {
            warn!("[!] Settings file is unreadable, keeping the loaded settings");
            return;
        }

        self.settings.replace(tree.clone()).await;
        self.working = tree;
        self.saving_settings = false;
        self.emit(ControllerEvent::SettingsReloaded);

        if self.state() == ControllerState::Idle {
            let idle = self.poller.idle_report().await;
            self.emit(ControllerEvent::Report(idle));
        }
    }
}

/// How a launch sequence ended
enum LaunchOutcome {
    Started {
        source: Arc<dyn StatusSource>,
        pid: Option<u32>,
        endpoint: StatusEndpoint,
    },
    Aborted(String),
    /// Cancelled before the worker ran, or stopped again right after it started
    Cancelled,
}

struct PendingLaunch {
    task: JoinHandle<LaunchOutcome>,
    cancel: CancellationToken,
}

/// One launch: settle, endpoint, advisories, bind check, start
struct LaunchJob {
    worker: WorkerConfig,
    settle_until: Option<Instant>,
    host: Arc<dyn WorkerHost>,
    sources: Arc<dyn SourceFactory>,
    probe: Arc<dyn ConnectivityProbe>,
    gate: Arc<dyn AdvisoryGate>,
    settings: SettingsHandle,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl LaunchJob {
    async fn run(self, cancel: CancellationToken) -> LaunchOutcome {
        let prepared = tokio::select! {
            _ = cancel.cancelled() => return LaunchOutcome::Cancelled,
            prepared = self.prepare() => prepared,
        };
        let (endpoint, source) = match prepared {
            Ok(ready) => ready,
            Err(reason) => return LaunchOutcome::Aborted(reason),
        };

        // Starting runs to completion; a spawned worker is stopped, never dropped
        let spec = LaunchSpec::from_config(&self.worker);
        info!("Launching {} in {}", spec.program, spec.working_dir.display());
        if !self.host.start(&spec).await {
            return LaunchOutcome::Aborted("Worker failed to start".to_string());
        }
        if cancel.is_cancelled() {
            info!("Launch was cancelled while starting, stopping worker");
            self.host.stop().await;
            return LaunchOutcome::Cancelled;
        }

        LaunchOutcome::Started {
            source,
            pid: self.host.pid(),
            endpoint,
        }
    }

    async fn prepare(&self) -> Result<(StatusEndpoint, Arc<dyn StatusSource>), String> {
        if let Some(until) = self.settle_until {
            sleep_until(until).await;
        }

        let raw = self.settings.endpoint_setting().await;
        let endpoint = resolve_endpoint(&raw).map_err(|e| e.to_string())?;

        for advisory in collect_advisories(&self.worker, self.probe.as_ref()).await {
            let accepted = self.gate.confirm(&advisory).await;
            let _ = self.events.send(ControllerEvent::Advisory {
                advisory: advisory.clone(),
                accepted,
            });
            if !accepted {
                return Err(format!("Launch cancelled: {}", advisory));
            }
        }

        verify_bindable(&endpoint).await.map_err(|e| e.to_string())?;
        let source = self
            .sources
            .connect(&endpoint)
            .map_err(|e| format!("Status endpoint unusable: {}", e))?;
        Ok((endpoint, source))
    }
}
