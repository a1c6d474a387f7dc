//! Display - operator-facing formatting of report values
//!
//! Rules:
//! - Unknown readings render as `--` followed by the unit
//! - Hash rates pick precision by magnitude
//! - Large numbers get thousands separators

use crate::report::{DashboardEntry, Summary, UNKNOWN_TEMPERATURE};

/// Group the integer part of a formatted number with commas
fn group_thousands(formatted: &str) -> String {
    let (sign, rest) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted),
    };
    let (int_part, frac_part) = match rest.find('.') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}{}", sign, grouped, frac_part)
}

/// Fixed-precision number with thousands separators
pub fn number(value: f64, decimals: usize) -> String {
    group_thousands(&format!("{:.*}", decimals, value))
}

/// Hash rate with magnitude-dependent precision
pub fn hash_rate(rate: f64, unit: &str) -> String {
    let decimals = if rate >= 1000.0 {
        0
    } else if rate > 100.0 {
        1
    } else if rate > 10.0 {
        2
    } else if rate > 0.0 {
        3
    } else {
        return format!("--{}", unit);
    };
    format!("{}{}", number(rate, decimals), unit)
}

pub fn uptime(secs: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let days = secs / DAY;
    let hours = (secs % DAY) / HOUR;
    let minutes = (secs % HOUR) / MINUTE;
    let seconds = secs % MINUTE;

    if secs >= DAY {
        format!("{:03}d {:02}h {:02}m", days, hours, minutes)
    } else if secs >= HOUR {
        format!("{:02}h {:02}m {:02}s", hours, minutes, seconds)
    } else if secs >= MINUTE {
        format!("{:02}m {:02}s", minutes, seconds)
    } else if secs > 1 {
        format!("{}s", secs)
    } else {
        "--s".to_string()
    }
}

/// Percentage, `--%` for negative sentinels
pub fn percent(value: f64, decimals: usize) -> String {
    if value >= 0.0 {
        format!("{}%", number(value, decimals))
    } else {
        "--%".to_string()
    }
}

pub fn latency(ms: i32) -> String {
    if ms >= 0 {
        format!("{}ms", ms)
    } else {
        "--ms".to_string()
    }
}

pub fn temperature(celsius: i32) -> String {
    if celsius > UNKNOWN_TEMPERATURE {
        format!("{}°C", celsius)
    } else {
        "--°C".to_string()
    }
}

/// Integer reading with unit, `--<unit>` when negative
pub fn reading(value: i32, unit: &str) -> String {
    if value >= 0 {
        format!("{}{}", value, unit)
    } else {
        format!("--{}", unit)
    }
}

fn or_dashes(text: &str) -> &str {
    if text.trim().is_empty() {
        "--"
    } else {
        text
    }
}

/// One-line summary for the console front end
pub fn summary_line(summary: &Summary) -> String {
    let submission = summary
        .submission_rate()
        .map(|rate| format!("{}%", number(rate, 1)))
        .unwrap_or_else(|| "--%".to_string());
    let ratio = summary
        .hash_rate_ratio()
        .map(|ratio| format!("{}%", number(ratio, 2)))
        .unwrap_or_else(|| "--%".to_string());

    format!(
        "up {} | {} / {} ({}) | shares {}/{} ({}) | latency {} | cpu {} | max {}",
        uptime(summary.uptime_secs),
        hash_rate(summary.effective_hash_rate, &summary.hash_rate_unit),
        hash_rate(summary.total_hash_rate, &summary.hash_rate_unit),
        ratio,
        summary.accepted_shares,
        summary.rejected_shares,
        submission,
        latency(summary.latency_ms),
        percent(summary.cpu_load_percent, 2),
        temperature(summary.max_temperature_c),
    )
}

/// One-line device row for the console front end
pub fn dashboard_line(entry: &DashboardEntry) -> String {
    let intensity = if entry.intensity > 0.0 {
        number(entry.intensity, 4)
    } else {
        "--".to_string()
    };
    let utilization = if entry.utilization_percent > 0.0 {
        percent(entry.utilization_percent, 0)
    } else {
        "--%".to_string()
    };

    format!(
        "[{}] {} {} | {} | i {} | util {} | {} | fan {} {} | core {} | mem {} | power {}",
        or_dashes(&entry.bus_id),
        entry.brand,
        or_dashes(&entry.name),
        hash_rate(entry.hash_rate, &entry.hash_rate_unit),
        intensity,
        utilization,
        temperature(entry.temperature_c),
        reading(entry.fan_tachometer_rpm, "RPM"),
        percent(entry.fan_level_percent as f64, 0),
        reading(entry.core_clock_mhz, "MHz"),
        reading(entry.memory_clock_mhz, "MHz"),
        percent(entry.power_limit_percent as f64, 2),
    )
}
