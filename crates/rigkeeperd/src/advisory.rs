//! Pre-launch advisories
//!
//! Rules:
//! - Advisories never block by themselves; an [`AdvisoryGate`] decides
//! - Checks: network reachability, worker binary presence, runtime version
//! - Endpoint problems are not advisories; they abort the launch

use async_trait::async_trait;
use rigkeeper_common::{NetworkConfig, RuntimeRequirement, WorkerConfig};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, warn};

/// A non-fatal launch concern for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    NetworkDisconnected,
    WorkerMissing { path: PathBuf },
    /// `found` is `None` when no runtime could be detected
    RuntimeOutdated {
        found: Option<RuntimeVersion>,
        minimum: RuntimeVersion,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkDisconnected => write!(f, "No network connection detected"),
            Self::WorkerMissing { path } => write!(f, "Worker not found at {}", path.display()),
            Self::RuntimeOutdated {
                found: Some(found),
                minimum,
            } => write!(f, "Runtime {} is older than the required {}", found, minimum),
            Self::RuntimeOutdated { found: None, minimum } => {
                write!(f, "Runtime {} or newer was not found", minimum)
            }
        }
    }
}

/// Decides whether the launch continues despite an advisory
#[async_trait]
pub trait AdvisoryGate: Send + Sync {
    async fn confirm(&self, advisory: &Advisory) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl AdvisoryGate for AcceptAll {
    async fn confirm(&self, advisory: &Advisory) -> bool {
        warn!("[!] {} (continuing)", advisory);
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

#[async_trait]
impl AdvisoryGate for RejectAll {
    async fn confirm(&self, advisory: &Advisory) -> bool {
        warn!("[!] {}", advisory);
        false
    }
}

/// Internet reachability check
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Reachable if any configured address accepts a TCP connection
#[derive(Debug, Clone)]
pub struct TcpConnectivityProbe {
    addresses: Vec<SocketAddr>,
    timeout: Duration,
}

impl TcpConnectivityProbe {
    pub fn new(addresses: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { addresses, timeout }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        let addresses = config
            .probe_addresses
            .iter()
            .filter_map(|raw| match raw.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!("[!] Ignoring invalid probe address '{}'", raw);
                    None
                }
            })
            .collect();
        Self::new(addresses, config.probe_timeout())
    }
}

#[async_trait]
impl ConnectivityProbe for TcpConnectivityProbe {
    async fn is_connected(&self) -> bool {
        for addr in &self.addresses {
            match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => debug!("Probe {} failed: {}", addr, e),
                Err(_) => debug!("Probe {} timed out", addr),
            }
        }
        false
    }
}

/// Fixed connectivity answer
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

#[async_trait]
impl ConnectivityProbe for StaticConnectivity {
    async fn is_connected(&self) -> bool {
        self.0
    }
}

/// Dotted numeric version: major.minor[.build[.revision]]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion([u64; 4]);

impl RuntimeVersion {
    pub fn new(major: u64, minor: u64, build: u64) -> Self {
        Self([major, minor, build, 0])
    }
}

impl FromStr for RuntimeVersion {
    type Err = String;

    /// Parses the leading digits-and-dots run, so `2.1.0-preview` is `2.1.0`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start();
        let end = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let numeric = &s[..end];

        let mut parts = [0u64; 4];
        let mut count = 0;
        for piece in numeric.split('.') {
            if count == parts.len() {
                return Err(format!("too many components in '{}'", s));
            }
            parts[count] = piece
                .parse()
                .map_err(|_| format!("invalid version '{}'", s))?;
            count += 1;
        }
        Ok(Self(parts))
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, build, revision] = self.0;
        if revision > 0 {
            write!(f, "{}.{}.{}.{}", major, minor, build, revision)
        } else {
            write!(f, "{}.{}.{}", major, minor, build)
        }
    }
}

/// Highest version on lines starting with `prefix`
pub fn parse_runtime_versions(output: &str, prefix: &str) -> Option<RuntimeVersion> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(prefix))
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|raw| match raw.parse::<RuntimeVersion>() {
            Ok(version) => Some(version),
            Err(e) => {
                debug!("Skipping runtime line: {}", e);
                None
            }
        })
        .max()
}

/// Run the runtime's info command and compare against the minimum
pub async fn check_runtime(requirement: &RuntimeRequirement) -> Option<Advisory> {
    let minimum = match requirement.minimum.parse::<RuntimeVersion>() {
        Ok(minimum) => minimum,
        Err(e) => {
            warn!("[!] Ignoring runtime requirement: {}", e);
            return None;
        }
    };

    let output = Command::new(&requirement.command)
        .args(&requirement.args)
        .stdin(Stdio::null())
        .output()
        .await;

    let found = match output {
        Ok(output) => parse_runtime_versions(&String::from_utf8_lossy(&output.stdout), &requirement.line_prefix),
        Err(e) => {
            debug!("Runtime check '{}' failed: {}", requirement.command, e);
            None
        }
    };

    match found {
        Some(found) if found >= minimum => None,
        found => Some(Advisory::RuntimeOutdated { found, minimum }),
    }
}

/// All advisories for launching `worker`
pub async fn collect_advisories(worker: &WorkerConfig, probe: &dyn ConnectivityProbe) -> Vec<Advisory> {
    let mut advisories = Vec::new();

    if !probe.is_connected().await {
        advisories.push(Advisory::NetworkDisconnected);
    }

    let binary = worker.binary_path();
    if !tokio::fs::try_exists(&binary).await.unwrap_or(false) {
        advisories.push(Advisory::WorkerMissing { path: binary });
    }

    if let Some(requirement) = &worker.runtime {
        if let Some(advisory) = check_runtime(requirement).await {
            advisories.push(advisory);
        }
    }

    advisories
}
