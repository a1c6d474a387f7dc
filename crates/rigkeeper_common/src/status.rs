//! Status Document - the worker's JSON telemetry endpoint payload
//!
//! Rules:
//! - Every field is optional; a missing field becomes its unknown sentinel
//! - Device brand: `Type == "CUDA"` wins, then "Intel" in the model name,
//!   then the AMD OpenCL platform name, else Unknown
//! - Max temperature is tracked while the device list is built

use crate::report::{Brand, DashboardEntry, Report, Summary, UNKNOWN, UNKNOWN_F64, UNKNOWN_TEMPERATURE};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const CUDA_DEVICE_KIND: &str = "CUDA";
const INTEL_NAME_MARKER: &str = "intel";
const AMD_PLATFORM_MARKER: &str = "amd accelerated parallel processing";

/// Top-level status document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusDocument {
    pub uptime: Option<f64>,
    pub miner_address: Option<String>,
    #[serde(rename = "MiningURL")]
    pub mining_url: Option<String>,
    pub current_challenge: Option<String>,
    pub current_difficulty: Option<f64>,
    pub accepted_shares: Option<f64>,
    pub rejected_shares: Option<f64>,
    #[serde(rename = "LatencyMS")]
    pub latency_ms: Option<f64>,
    #[serde(rename = "LastSubmitLatencyMS")]
    pub last_submit_latency_ms: Option<f64>,
    pub effective_hash_rate: Option<f64>,
    pub total_hash_rate: Option<f64>,
    pub hash_rate_unit: Option<String>,
    pub miners: Option<Vec<DeviceStatus>>,
}

/// One entry of the `Miners` array
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceStatus {
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    #[serde(rename = "DeviceID")]
    pub device_id: Option<f64>,
    #[serde(rename = "PciBusID")]
    pub pci_bus_id: Option<f64>,
    pub model_name: Option<String>,
    pub platform: Option<String>,
    pub hash_rate: Option<f64>,
    pub setting_intensity: Option<f64>,
    pub current_utilization_percent: Option<f64>,
    #[serde(rename = "CurrentTemperatureC")]
    pub current_temperature_c: Option<f64>,
    #[serde(rename = "CurrentFanTachometerRPM")]
    pub current_fan_tachometer_rpm: Option<f64>,
    pub setting_fan_level_percent: Option<f64>,
    #[serde(rename = "CurrentCoreClockMHz")]
    pub current_core_clock_mhz: Option<f64>,
    #[serde(rename = "CurrentMemoryClockMHz")]
    pub current_memory_clock_mhz: Option<f64>,
    pub setting_power_limit_percent: Option<f64>,
}

/// Parse a status document body; blank or malformed text is an error
pub fn parse_status(body: &str) -> Result<StatusDocument, serde_json::Error> {
    serde_json::from_str(body)
}

/// Classify a device by kind, then model name, then platform
pub fn classify_brand(kind: Option<&str>, name: &str, platform: &str) -> Brand {
    if kind == Some(CUDA_DEVICE_KIND) {
        Brand::Nvidia
    } else if name.to_lowercase().contains(INTEL_NAME_MARKER) {
        Brand::Intel
    } else if platform.to_lowercase().contains(AMD_PLATFORM_MARKER) {
        Brand::Amd
    } else {
        Brand::Unknown
    }
}

fn int_or(value: Option<f64>, fallback: i32) -> i32 {
    match value {
        Some(v) if v.is_finite() => v.round() as i32,
        _ => fallback,
    }
}

fn count(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v as u64,
        _ => 0,
    }
}

impl DeviceStatus {
    fn to_entry(&self, hash_rate_unit: &str) -> DashboardEntry {
        let name = self.model_name.clone().unwrap_or_default();
        let platform = self.platform.as_deref().unwrap_or("");
        let bus_id = match self.pci_bus_id {
            Some(id) if id.is_finite() && id >= 0.0 => format!("{:02X}", id as u32),
            _ => String::new(),
        };

        DashboardEntry {
            bus_id,
            brand: classify_brand(self.kind.as_deref(), &name, platform),
            name,
            hash_rate: self.hash_rate.unwrap_or(UNKNOWN_F64),
            hash_rate_unit: hash_rate_unit.to_string(),
            intensity: self.setting_intensity.unwrap_or(UNKNOWN_F64),
            utilization_percent: self.current_utilization_percent.unwrap_or(UNKNOWN_F64),
            temperature_c: int_or(self.current_temperature_c, UNKNOWN_TEMPERATURE),
            fan_tachometer_rpm: int_or(self.current_fan_tachometer_rpm, UNKNOWN as i32),
            fan_level_percent: int_or(self.setting_fan_level_percent, UNKNOWN as i32),
            core_clock_mhz: int_or(self.current_core_clock_mhz, UNKNOWN as i32),
            memory_clock_mhz: int_or(self.current_memory_clock_mhz, UNKNOWN as i32),
            power_limit_percent: int_or(self.setting_power_limit_percent, UNKNOWN as i32),
        }
    }
}

/// Build a report from a status document and the sampled CPU load
pub fn translate(doc: &StatusDocument, cpu_load_percent: f64, received_at: DateTime<Utc>) -> Report {
    let hash_rate_unit = doc.hash_rate_unit.clone().unwrap_or_default();
    let mut max_temperature_c = UNKNOWN_TEMPERATURE;

    let dashboards: Vec<DashboardEntry> = doc
        .miners
        .iter()
        .flatten()
        .map(|device| {
            let entry = device.to_entry(&hash_rate_unit);
            max_temperature_c = max_temperature_c.max(entry.temperature_c);
            entry
        })
        .collect();

    let summary = Summary {
        uptime_secs: count(doc.uptime),
        miner_address: doc.miner_address.clone().unwrap_or_default(),
        mining_url: doc.mining_url.clone().unwrap_or_default(),
        current_challenge: doc.current_challenge.clone().unwrap_or_default(),
        current_difficulty: count(doc.current_difficulty),
        accepted_shares: count(doc.accepted_shares),
        rejected_shares: count(doc.rejected_shares),
        latency_ms: int_or(doc.latency_ms, UNKNOWN as i32),
        last_submit_latency_ms: int_or(doc.last_submit_latency_ms, UNKNOWN as i32),
        effective_hash_rate: doc.effective_hash_rate.unwrap_or(UNKNOWN_F64),
        total_hash_rate: doc.total_hash_rate.unwrap_or(UNKNOWN_F64),
        hash_rate_unit,
        cpu_load_percent,
        max_temperature_c,
    };

    Report {
        summary,
        dashboards,
        received_at,
    }
}
