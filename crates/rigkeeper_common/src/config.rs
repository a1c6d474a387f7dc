//! Rigkeeper Configuration
//!
//! Supervisor settings (not the worker's own settings file).
//! Config file: ~/.config/rigkeeper/config.toml or /etc/rigkeeper/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_worker_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rigkeeper")
        .join("worker")
}

fn default_program() -> String {
    "dotnet".to_string()
}

fn default_args() -> Vec<String> {
    vec!["SoliditySHA3Miner.dll".to_string()]
}

fn default_binary() -> String {
    "SoliditySHA3Miner.dll".to_string()
}

fn default_settings_file() -> String {
    "SoliditySHA3Miner.conf".to_string()
}

fn default_prelaunch_file() -> String {
    if cfg!(windows) {
        "prelaunch.bat".to_string()
    } else {
        "prelaunch.sh".to_string()
    }
}

/// Worker process location and invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Working directory of the worker
    #[serde(default = "default_worker_directory")]
    pub directory: PathBuf,

    /// Executable to launch
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// File checked for presence before launch (relative to `directory`)
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Worker settings file (relative to `directory`)
    #[serde(default = "default_settings_file")]
    pub settings_file: String,

    /// Script body run to completion before every launch
    #[serde(default)]
    pub prelaunch_script: Option<String>,

    /// Transient file the pre-launch script is written to
    #[serde(default = "default_prelaunch_file")]
    pub prelaunch_file: String,

    /// Runtime the worker needs, checked as an advisory
    #[serde(default)]
    pub runtime: Option<RuntimeRequirement>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            directory: default_worker_directory(),
            program: default_program(),
            args: default_args(),
            binary: default_binary(),
            settings_file: default_settings_file(),
            prelaunch_script: None,
            prelaunch_file: default_prelaunch_file(),
            runtime: None,
        }
    }
}

impl WorkerConfig {
    pub fn settings_path(&self) -> PathBuf {
        self.directory.join(&self.settings_file)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.directory.join(&self.binary)
    }
}

fn default_runtime_args() -> Vec<String> {
    vec!["--info".to_string()]
}

fn default_runtime_prefix() -> String {
    "Microsoft.NETCore.App".to_string()
}

fn default_runtime_minimum() -> String {
    "2.1.0".to_string()
}

/// Minimum runtime version, read from `<command> <args>` output lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRequirement {
    #[serde(default = "default_program")]
    pub command: String,

    #[serde(default = "default_runtime_args")]
    pub args: Vec<String>,

    /// Output lines starting with this prefix carry a version
    #[serde(default = "default_runtime_prefix")]
    pub line_prefix: String,

    #[serde(default = "default_runtime_minimum")]
    pub minimum: String,
}

impl Default for RuntimeRequirement {
    fn default() -> Self {
        Self {
            command: default_program(),
            args: default_runtime_args(),
            line_prefix: default_runtime_prefix(),
            minimum: default_runtime_minimum(),
        }
    }
}

fn default_max_log_lines() -> usize {
    1000
}

fn default_watchdog_interval_secs() -> u64 {
    1
}

fn default_stop_timeout_secs() -> u64 {
    15
}

fn default_liveness_probe_ms() -> u64 {
    200
}

fn default_start_grace_secs() -> u64 {
    45
}

fn default_post_stop_settle_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    10
}

/// Process supervision timings and relaunch policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionConfig {
    /// Rolling log capacity (0 disables logging)
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,

    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,

    /// Wait for each graceful stop step before escalating
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Delay before the post-spawn liveness check
    #[serde(default = "default_liveness_probe_ms")]
    pub liveness_probe_ms: u64,

    /// Time allowed for the first report after spawn
    #[serde(default = "default_start_grace_secs")]
    pub start_grace_secs: u64,

    /// Quiet period after a stop before the next start
    #[serde(default = "default_post_stop_settle_ms")]
    pub post_stop_settle_ms: u64,

    /// Relaunch after an unexpected worker exit
    #[serde(default = "default_true")]
    pub auto_relaunch: bool,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Launch as soon as the supervisor starts
    #[serde(default)]
    pub auto_launch: bool,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_log_lines: default_max_log_lines(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            liveness_probe_ms: default_liveness_probe_ms(),
            start_grace_secs: default_start_grace_secs(),
            post_stop_settle_ms: default_post_stop_settle_ms(),
            auto_relaunch: true,
            cooldown_secs: default_cooldown_secs(),
            auto_launch: false,
        }
    }
}

impl SupervisionConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn liveness_probe(&self) -> Duration {
        Duration::from_millis(self.liveness_probe_ms)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_secs(self.start_grace_secs)
    }

    pub fn post_stop_settle(&self) -> Duration {
        Duration::from_millis(self.post_stop_settle_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    5
}

/// Status endpoint polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TelemetryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_probe_addresses() -> Vec<String> {
    ["1.1.1.1:53", "1.0.0.1:53", "8.8.8.8:53", "8.8.4.4:53"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

/// Connectivity advisory probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_probe_addresses")]
    pub probe_addresses: Vec<String>,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_addresses: default_probe_addresses(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Main Rigkeeper configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RigkeeperConfig {
    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub supervision: SupervisionConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub network: NetworkConfig,
}

impl RigkeeperConfig {
    /// Default user config path: ~/.config/rigkeeper/config.toml
    pub fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Cannot determine config directory")?;
        Ok(config_dir.join("rigkeeper").join("config.toml"))
    }

    /// System config path: /etc/rigkeeper/config.toml
    pub fn system_config_path() -> PathBuf {
        PathBuf::from("/etc/rigkeeper/config.toml")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load configuration
    ///
    /// Priority:
    /// 1. Explicit path (must exist)
    /// 2. User config (~/.config/rigkeeper/config.toml)
    /// 3. System config (/etc/rigkeeper/config.toml)
    /// 4. Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(user_path) = Self::user_config_path() {
            if user_path.exists() {
                return Self::from_file(&user_path);
            }
        }

        let system_path = Self::system_config_path();
        if system_path.exists() {
            return Self::from_file(&system_path);
        }

        Ok(Self::default())
    }
}
