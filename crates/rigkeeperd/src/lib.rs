//! Rigkeeper Daemon - supervises a mining worker process
//!
//! Starts and stops the worker, keeps its rolling log, polls its status
//! endpoint into reports, and relaunches it after unexpected exits.

pub mod advisory;
pub mod controller;
pub mod settings_watcher;
pub mod supervisor;
pub mod telemetry;

pub use controller::{Collaborators, Command, ControllerEvent, ControllerHandle, ControllerState, SupervisionController};
