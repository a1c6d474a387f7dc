//! Telemetry report model
//!
//! A [`Report`] pairs one [`Summary`] with the per-device [`DashboardEntry`]
//! list from the same poll. Numeric fields use explicit "unknown" sentinels
//! because zero is a legitimate reading.

use crate::settings::WorkerIdentity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Unknown value for rates, counters, clocks and percentages
pub const UNKNOWN: i64 = -1;

/// Unknown value for floating-point readings
pub const UNKNOWN_F64: f64 = -1.0;

/// Unknown temperature (−1 °C is a real reading)
pub const UNKNOWN_TEMPERATURE: i32 = i32::MIN;

/// Device vendor classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Brand {
    Nvidia,
    Amd,
    Intel,
    Unknown,
}

impl Brand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nvidia => "NVIDIA",
            Self::Amd => "AMD",
            Self::Intel => "INTEL",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-device telemetry snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardEntry {
    /// PCI bus id as two-digit upper-case hex, empty when not reported
    pub bus_id: String,
    pub brand: Brand,
    pub name: String,
    pub hash_rate: f64,
    pub hash_rate_unit: String,
    pub intensity: f64,
    pub utilization_percent: f64,
    pub temperature_c: i32,
    pub fan_tachometer_rpm: i32,
    pub fan_level_percent: i32,
    pub core_clock_mhz: i32,
    pub memory_clock_mhz: i32,
    pub power_limit_percent: i32,
}

impl DashboardEntry {
    /// Same device with every reading reset to its sentinel
    pub fn to_idle(&self) -> Self {
        Self {
            bus_id: self.bus_id.clone(),
            brand: self.brand,
            name: self.name.clone(),
            hash_rate: UNKNOWN_F64,
            hash_rate_unit: self.hash_rate_unit.clone(),
            intensity: UNKNOWN_F64,
            utilization_percent: UNKNOWN_F64,
            temperature_c: UNKNOWN_TEMPERATURE,
            fan_tachometer_rpm: UNKNOWN as i32,
            fan_level_percent: UNKNOWN as i32,
            core_clock_mhz: UNKNOWN as i32,
            memory_clock_mhz: UNKNOWN as i32,
            power_limit_percent: UNKNOWN as i32,
        }
    }
}

/// Session-wide aggregate statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub uptime_secs: u64,
    pub miner_address: String,
    pub mining_url: String,
    pub current_challenge: String,
    pub current_difficulty: u64,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
    pub latency_ms: i32,
    pub last_submit_latency_ms: i32,
    pub effective_hash_rate: f64,
    pub total_hash_rate: f64,
    pub hash_rate_unit: String,
    /// Worker process-tree CPU load, percent of all logical CPUs
    pub cpu_load_percent: f64,
    pub max_temperature_c: i32,
}

impl Summary {
    /// Idle state showing only the configured target
    pub fn idle(identity: &WorkerIdentity) -> Self {
        Self {
            uptime_secs: 0,
            miner_address: identity.address.clone(),
            mining_url: identity.url.clone(),
            current_challenge: String::new(),
            current_difficulty: 0,
            accepted_shares: 0,
            rejected_shares: 0,
            latency_ms: UNKNOWN as i32,
            last_submit_latency_ms: UNKNOWN as i32,
            effective_hash_rate: UNKNOWN_F64,
            total_hash_rate: UNKNOWN_F64,
            hash_rate_unit: String::new(),
            cpu_load_percent: UNKNOWN_F64,
            max_temperature_c: UNKNOWN_TEMPERATURE,
        }
    }

    /// Accepted share percentage, `None` before the first accepted share
    pub fn submission_rate(&self) -> Option<f64> {
        if self.accepted_shares == 0 {
            return None;
        }
        let total = self.accepted_shares + self.rejected_shares;
        Some(self.accepted_shares as f64 / total as f64 * 100.0)
    }

    /// Effective hash rate as a percentage of the total
    pub fn hash_rate_ratio(&self) -> Option<f64> {
        if self.effective_hash_rate > 0.0 && self.total_hash_rate > 0.0 {
            Some(self.effective_hash_rate / self.total_hash_rate * 100.0)
        } else {
            None
        }
    }
}

/// One delivered poll result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub summary: Summary,
    pub dashboards: Vec<DashboardEntry>,
    pub received_at: DateTime<Utc>,
}

impl Report {
    pub fn idle(identity: &WorkerIdentity) -> Self {
        Self {
            summary: Summary::idle(identity),
            dashboards: Vec::new(),
            received_at: Utc::now(),
        }
    }

    /// Idle copy that keeps the known devices with reset readings
    pub fn to_idle(&self, identity: &WorkerIdentity) -> Self {
        Self {
            summary: Summary::idle(identity),
            dashboards: self.dashboards.iter().map(DashboardEntry::to_idle).collect(),
            received_at: Utc::now(),
        }
    }

    /// The brand shared by every device, `Unknown` for mixed or empty rigs
    pub fn fleet_brand(&self) -> Brand {
        match self.dashboards.first() {
            Some(first) if self.dashboards.iter().all(|d| d.brand == first.brand) => first.brand,
            _ => Brand::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> WorkerIdentity {
        WorkerIdentity {
            address: "0xabc".to_string(),
            url: "http://pool.example:8080".to_string(),
        }
    }

    #[test]
    fn test_submission_rate() {
        let mut summary = Summary::idle(&identity());
        assert_eq!(summary.submission_rate(), None);

        summary.accepted_shares = 10;
        summary.rejected_shares = 5;
        let rate = summary.submission_rate().unwrap();
        assert!((rate - 66.666_666).abs() < 1e-3);

        summary.rejected_shares = 0;
        assert_eq!(summary.submission_rate(), Some(100.0));
    }

    #[test]
    fn test_hash_rate_ratio_needs_both_rates() {
        let mut summary = Summary::idle(&identity());
        assert_eq!(summary.hash_rate_ratio(), None);

        summary.effective_hash_rate = 450.0;
        summary.total_hash_rate = 500.0;
        assert_eq!(summary.hash_rate_ratio(), Some(90.0));
    }

    #[test]
    fn test_idle_summary_uses_sentinels_and_identity() {
        let summary = Summary::idle(&identity());
        assert_eq!(summary.miner_address, "0xabc");
        assert_eq!(summary.mining_url, "http://pool.example:8080");
        assert_eq!(summary.max_temperature_c, UNKNOWN_TEMPERATURE);
        assert_eq!(summary.latency_ms, -1);
        assert_eq!(summary.cpu_load_percent, UNKNOWN_F64);
    }

    #[test]
    fn test_fleet_brand() {
        let device = |brand| DashboardEntry {
            bus_id: "01".to_string(),
            brand,
            name: "dev".to_string(),
            hash_rate: 1.0,
            hash_rate_unit: "MH/s".to_string(),
            intensity: 24.0,
            utilization_percent: 99.0,
            temperature_c: 60,
            fan_tachometer_rpm: 1500,
            fan_level_percent: 50,
            core_clock_mhz: 1800,
            memory_clock_mhz: 4000,
            power_limit_percent: 90,
        };

        let mut report = Report::idle(&identity());
        assert_eq!(report.fleet_brand(), Brand::Unknown);

        report.dashboards = vec![device(Brand::Amd), device(Brand::Amd)];
        assert_eq!(report.fleet_brand(), Brand::Amd);

        report.dashboards.push(device(Brand::Nvidia));
        assert_eq!(report.fleet_brand(), Brand::Unknown);

        let idle = report.to_idle(&identity());
        assert_eq!(idle.dashboards.len(), 3);
        assert_eq!(idle.dashboards[0].name, "dev");
        assert_eq!(idle.dashboards[0].temperature_c, UNKNOWN_TEMPERATURE);
        assert_eq!(idle.dashboards[0].hash_rate, UNKNOWN_F64);
    }
}
