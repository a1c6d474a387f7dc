//! Settings Watcher - notices when the worker's settings file changes
//!
//! Watches the worker directory (non-recursive) and reports creation or
//! modification of the settings file. Other files are ignored.

use anyhow::{Context, Result};
use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The settings file was created or rewritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsChanged {
    pub path: PathBuf,
}

pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
}

/// Whether `event` is a create/modify touching a file named `file_name`
fn is_settings_event(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

impl SettingsWatcher {
    pub fn new(settings_path: &Path, tx: mpsc::UnboundedSender<SettingsChanged>) -> Result<Self> {
        let directory = settings_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name = settings_path
            .file_name()
            .context("Settings path has no file name")?
            .to_os_string();

        std::fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create {}", directory.display()))?;

        let changed = settings_path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if is_settings_event(&event, &file_name) {
                    debug!("Settings file event: {:?}", event.kind);
                    let _ = tx.send(SettingsChanged {
                        path: changed.clone(),
                    });
                }
            }
            Err(e) => warn!("Watch error: {:?}", e),
        })?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", directory.display()))?;

        info!("Watching {} for settings changes", settings_path.display());

        Ok(Self { _watcher: watcher })
    }
}
