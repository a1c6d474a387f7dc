//! Rigkeeper Daemon - mining worker supervisor
//!
//! Runs the worker under supervision and prints its log and status reports.
//! Also inspects and edits the worker settings file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rigkeeper_common::display::{dashboard_line, summary_line};
use rigkeeper_common::{
    edit_leaf, load_settings, merge_into, resolve_endpoint, save_settings, severity,
    verify_bindable, ConfigPath, LogEvent, LogSeverity, RigkeeperConfig, SettingsHandle,
};
use rigkeeperd::advisory::{AcceptAll, AdvisoryGate, RejectAll, TcpConnectivityProbe};
use rigkeeperd::settings_watcher::SettingsWatcher;
use rigkeeperd::supervisor::{platform_signaller, ProcessSupervisor, SupervisorOptions};
use rigkeeperd::telemetry::{HttpSourceFactory, SystemProcessClock, TelemetryPoller};
use rigkeeperd::{Collaborators, ControllerEvent, SupervisionController};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rigkeeperd")]
#[command(about = "Rigkeeper - mining worker supervisor", long_about = None)]
#[command(version)]
struct Cli {
    /// Supervisor config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the worker until Ctrl-C
    Run {
        /// Launch the worker right away
        #[arg(long)]
        launch: bool,

        /// Continue past launch advisories instead of cancelling
        #[arg(long)]
        accept_advisories: bool,
    },

    /// Inspect or edit the worker settings file
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Validate a status endpoint value
    Endpoint { value: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print every setting with its path
    Show,

    /// Set one setting; the value must fit the existing type
    Set { path: String, value: String },

    /// Carry values from an old settings file into a newer one
    Merge {
        old: PathBuf,
        new: PathBuf,

        /// Write the result here instead of over NEW
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let config = RigkeeperConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            launch,
            accept_advisories,
        } => run(config, launch, accept_advisories).await,
        Commands::Settings { action } => settings(&config, action).await,
        Commands::Endpoint { value } => endpoint(&value).await,
    }
}

async fn run(config: RigkeeperConfig, launch: bool, accept_advisories: bool) -> Result<()> {
    info!("Rigkeeper v{} starting", env!("CARGO_PKG_VERSION"));

    let settings = SettingsHandle::default();
    let (supervisor, channels) = ProcessSupervisor::new(
        SupervisorOptions::from_config(&config.supervision),
        platform_signaller(),
    );
    let (poller, reports) = TelemetryPoller::new(
        config.telemetry.poll_interval(),
        Box::new(SystemProcessClock::new()),
        settings.clone(),
    );

    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let (watcher, settings_changes) = match SettingsWatcher::new(&config.worker.settings_path(), changes_tx) {
        Ok(watcher) => (Some(watcher), Some(changes_rx)),
        Err(e) => {
            warn!("[!] Settings changes will not be picked up: {:#}", e);
            (None, None)
        }
    };

    let gate: Arc<dyn AdvisoryGate> = if accept_advisories {
        Arc::new(AcceptAll)
    } else {
        Arc::new(RejectAll)
    };

    let parts = Collaborators {
        host: Arc::new(supervisor),
        logs: channels.logs,
        exits: channels.exits,
        poller,
        reports,
        sources: Arc::new(HttpSourceFactory {
            timeout: config.telemetry.request_timeout(),
        }),
        probe: Arc::new(TcpConnectivityProbe::from_config(&config.network)),
        gate,
        settings,
        settings_changes,
    };

    let (controller, handle, mut events) = SupervisionController::new(config, parts);
    let task = tokio::spawn(controller.run());
    if launch {
        handle.launch()?;
    }

    let mut shutting_down = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !shutting_down => {
                info!("Shutting down gracefully");
                handle.shutdown();
                shutting_down = true;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
        }
    }

    task.await.context("Controller task panicked")??;
    drop(watcher);
    Ok(())
}

fn print_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::Log(LogEvent::Appended(update)) => match severity(&update.line) {
            LogSeverity::Error | LogSeverity::Warn => eprintln!("{}", update.line),
            LogSeverity::Info => println!("{}", update.line),
        },
        ControllerEvent::Log(LogEvent::Cleared) => debug!("Worker log cleared"),
        ControllerEvent::Report(report) => {
            println!("{}", summary_line(&report.summary));
            for entry in &report.dashboards {
                println!("  {}", dashboard_line(entry));
            }
        }
        ControllerEvent::State(state) => info!("Worker {}", state),
        ControllerEvent::Advisory { advisory, accepted } => {
            debug!("Advisory '{}' accepted: {}", advisory, accepted)
        }
        ControllerEvent::LaunchAborted(reason) => eprintln!("Launch aborted: {}", reason),
        ControllerEvent::RelaunchScheduled { after } => {
            println!("Worker exited unexpectedly, relaunching in {}s", after.as_secs())
        }
        ControllerEvent::WorkerExited { code, expected } => {
            info!("Worker exited (code {:?}, expected: {})", code, expected)
        }
        ControllerEvent::SettingsReloaded => debug!("Settings reloaded"),
    }
}

async fn settings(config: &RigkeeperConfig, action: SettingsAction) -> Result<()> {
    let path = config.worker.settings_path();

    match action {
        SettingsAction::Show => match load_settings(&path).await? {
            Some(tree) => {
                for (leaf, value) in tree.leaves() {
                    println!("{} = {}", leaf, value);
                }
            }
            None => println!("No settings at {}", path.display()),
        },
        SettingsAction::Set { path: leaf, value } => {
            let leaf: ConfigPath = leaf.parse()?;
            let reference = load_settings(&path)
                .await?
                .with_context(|| format!("No settings at {}", path.display()))?;

            let mut working = reference.clone();
            let value = edit_leaf(&mut working, &leaf, &value, &reference)?;
            save_settings(&path, &working).await?;
            println!("{} = {}", leaf, value);
        }
        SettingsAction::Merge { old, new, out } => {
            let previous = load_settings(&old)
                .await?
                .with_context(|| format!("No settings in {}", old.display()))?;
            let mut merged = load_settings(&new)
                .await?
                .with_context(|| format!("No settings in {}", new.display()))?;

            let stats = merge_into(&previous, &mut merged);
            let target = out.unwrap_or(new);
            save_settings(&target, &merged).await?;
            println!(
                "Merged into {}: {} copied, {} dropped, {} kept at default",
                target.display(),
                stats.copied,
                stats.dropped,
                stats.defaulted
            );
        }
    }

    Ok(())
}

async fn endpoint(value: &str) -> Result<()> {
    let endpoint = resolve_endpoint(value)?;
    verify_bindable(&endpoint).await?;
    println!("{} is usable", endpoint.uri);
    Ok(())
}
