//! Worker Settings - persisted worker configuration tree
//!
//! Rules:
//! - A missing settings file is not an error; it means "no settings yet"
//! - Reads retry while the file is empty and attempts remain (the worker
//!   may be mid-write when a change notification fires)
//! - Saves are pretty-printed JSON with key order preserved

use crate::config_tree::{ConfigPath, ConfigValue};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Key holding the worker's status endpoint
pub const ENDPOINT_KEY: &str = "minerJsonAPI";
pub const ADDRESS_KEY: &str = "minerAddress";
pub const PRIVATE_KEY_KEY: &str = "privateKey";
pub const POOL_KEY: &str = "primaryPool";
pub const WEB3_KEY: &str = "web3api";

/// Retry policy for reading a settings file that may be mid-write
#[derive(Debug, Clone, Copy)]
pub struct ReadRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReadRetry {
    fn default() -> Self {
        Self {
            attempts: 20,
            delay: Duration::from_millis(100),
        }
    }
}

/// Mining target shown while the worker is idle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub address: String,
    pub url: String,
}

/// Load the settings tree, `Ok(None)` if absent, empty or unparsable
pub async fn load_settings(path: &Path) -> Result<Option<ConfigValue>> {
    load_settings_with(path, ReadRetry::default()).await
}

pub async fn load_settings_with(path: &Path, retry: ReadRetry) -> Result<Option<ConfigValue>> {
    if !tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?
    {
        debug!("No settings file at {}", path.display());
        return Ok(None);
    }

    let mut text = String::new();
    let mut attempt = 0;
    while text.trim().is_empty() && attempt < retry.attempts {
        if attempt > 0 {
            tokio::time::sleep(retry.delay).await;
        }
        attempt += 1;
        match tokio::fs::read_to_string(path).await {
            Ok(content) => text = content,
            Err(e) => debug!("Settings read attempt {} failed: {}", attempt, e),
        }
    }

    if text.trim().is_empty() {
        warn!("[!] Settings file {} stayed empty after {} reads", path.display(), attempt);
        return Ok(None);
    }

    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => Ok(Some(ConfigValue::from_json(value))),
        Err(e) => {
            warn!("[!] Settings file {} is not valid JSON: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Persist the settings tree as pretty JSON
pub async fn save_settings(path: &Path, tree: &ConfigValue) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let text = serde_json::to_string_pretty(&tree.to_json()).context("Failed to serialize settings")?;
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    debug!("Saved settings to {}", path.display());
    Ok(())
}

fn text_at(tree: &ConfigValue, key: &str) -> String {
    tree.get(&ConfigPath::key(key))
        .map(ConfigValue::display_text)
        .unwrap_or_default()
}

/// Configured status endpoint text, blank when unset
pub fn endpoint_setting(tree: &ConfigValue) -> String {
    text_at(tree, ENDPOINT_KEY)
}

/// Address and mining URL from the settings tree
pub fn configured_identity(tree: &ConfigValue) -> WorkerIdentity {
    let url = if text_at(tree, PRIVATE_KEY_KEY).trim().is_empty() {
        text_at(tree, POOL_KEY)
    } else {
        text_at(tree, WEB3_KEY)
    };

    WorkerIdentity {
        address: text_at(tree, ADDRESS_KEY),
        url,
    }
}

/// Shared read-mostly handle to the last persisted settings snapshot
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Option<ConfigValue>>>,
}

impl SettingsHandle {
    pub fn new(initial: Option<ConfigValue>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn snapshot(&self) -> Option<ConfigValue> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, tree: Option<ConfigValue>) {
        *self.inner.write().await = tree;
    }

    pub async fn identity(&self) -> WorkerIdentity {
        self.inner
            .read()
            .await
            .as_ref()
            .map(configured_identity)
            .unwrap_or_default()
    }

    pub async fn endpoint_setting(&self) -> String {
        self.inner
            .read()
            .await
            .as_ref()
            .map(endpoint_setting)
            .unwrap_or_default()
    }
}
