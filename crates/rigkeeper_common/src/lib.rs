//! Rigkeeper Common - data model and algorithms shared by the supervisor
//!
//! Settings trees and their merge/normalize rules, the rolling worker log,
//! the telemetry report model and status document translation.

pub mod config;
pub mod config_tree;
pub mod display;
pub mod endpoint;
pub mod log_buffer;
pub mod report;
pub mod settings;
pub mod status;

pub use config::*;
pub use config_tree::*;
pub use endpoint::*;
pub use log_buffer::*;
pub use report::*;
pub use settings::*;
pub use status::*;
