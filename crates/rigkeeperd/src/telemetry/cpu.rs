//! Worker CPU load
//!
//! Load is the processor time the worker and its children used since the
//! previous sample, divided by the wall time between samples and the number
//! of logical CPUs. Baselines are reseeded after every sample so each value
//! covers only the latest interval.

use rigkeeper_common::UNKNOWN_F64;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};

/// Source of process-tree and processor-time readings
pub trait ProcessClock: Send {
    /// `root` and all of its descendants that are still alive
    fn related_processes(&mut self, root: u32) -> Vec<u32>;

    /// Cumulative user + system processor time of `pid`
    fn cpu_time(&mut self, pid: u32) -> Option<Duration>;
}

/// Load formula: `cpu / wall * 100 / logical_cpus`
pub fn cpu_load_percent(cpu: Duration, wall: Duration, logical_cpus: usize) -> f64 {
    if wall.is_zero() || logical_cpus == 0 {
        return 0.0;
    }
    cpu.as_secs_f64() / wall.as_secs_f64() * 100.0 / logical_cpus as f64
}

/// Process clock backed by sysinfo and `/proc/<pid>/stat`
pub struct SystemProcessClock {
    system: System,
    ticks_per_second: f64,
}

impl SystemProcessClock {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            ticks_per_second: clock_ticks_per_second(),
        }
    }
}

impl Default for SystemProcessClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_second() -> f64 {
    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

#[cfg(not(target_os = "linux"))]
fn clock_ticks_per_second() -> f64 {
    100.0
}

/// User + system ticks from the text of `/proc/<pid>/stat`
pub fn parse_stat_ticks(stat: &str) -> Option<u64> {
    // The command name may contain spaces and parentheses
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

impl ProcessClock for SystemProcessClock {
    fn related_processes(&mut self, root: u32) -> Vec<u32> {
        self.system.refresh_processes();

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, process) in self.system.processes() {
            if let Some(parent) = process.parent() {
                children.entry(parent.as_u32()).or_default().push(pid.as_u32());
            }
        }

        if self.system.process(Pid::from_u32(root)).is_none() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root]);
        let mut related = Vec::new();
        while let Some(pid) = queue.pop_front() {
            if !seen.insert(pid) {
                continue;
            }
            related.push(pid);
            if let Some(kids) = children.get(&pid) {
                queue.extend(kids.iter().copied());
            }
        }
        related
    }

    #[cfg(target_os = "linux")]
    fn cpu_time(&mut self, pid: u32) -> Option<Duration> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        let ticks = parse_stat_ticks(&stat)?;
        Some(Duration::from_secs_f64(ticks as f64 / self.ticks_per_second))
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_time(&mut self, _pid: u32) -> Option<Duration> {
        let _ = self.ticks_per_second;
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    cpu: Duration,
    at: Instant,
}

/// Per-process CPU baselines for one worker tree
pub struct CpuLoadTracker {
    clock: Box<dyn ProcessClock>,
    logical_cpus: usize,
    root: Option<u32>,
    baselines: HashMap<u32, Baseline>,
}

impl CpuLoadTracker {
    pub fn new(clock: Box<dyn ProcessClock>) -> Self {
        Self::with_cpus(clock, num_cpus::get())
    }

    pub fn with_cpus(clock: Box<dyn ProcessClock>, logical_cpus: usize) -> Self {
        Self {
            clock,
            logical_cpus: logical_cpus.max(1),
            root: None,
            baselines: HashMap::new(),
        }
    }

    /// Snapshot the worker tree rooted at `root` as the new baseline
    pub fn reseed(&mut self, root: u32) {
        self.reseed_at(root, Instant::now());
    }

    pub fn reseed_at(&mut self, root: u32, now: Instant) {
        self.root = Some(root);
        self.baselines.clear();
        for pid in self.clock.related_processes(root) {
            if let Some(cpu) = self.clock.cpu_time(pid) {
                self.baselines.insert(pid, Baseline { cpu, at: now });
            }
        }
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.baselines.clear();
    }

    /// Load since the last sample, then reseed
    pub fn sample(&mut self) -> f64 {
        self.sample_at(Instant::now())
    }

    pub fn sample_at(&mut self, now: Instant) -> f64 {
        let Some(root) = self.root else {
            return UNKNOWN_F64;
        };

        let mut load = 0.0;
        let pids: Vec<u32> = self.baselines.keys().copied().collect();
        for pid in pids {
            let (Some(base), Some(cpu)) = (self.baselines.get(&pid).copied(), self.clock.cpu_time(pid)) else {
                continue;
            };
            let used = cpu.saturating_sub(base.cpu);
            let wall = now.saturating_duration_since(base.at);
            load += cpu_load_percent(used, wall, self.logical_cpus);
        }

        self.reseed_at(root, now);
        load
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};

    /// Scripted process tree with settable processor times
    #[derive(Clone, Default)]
    struct FakeClock {
        times: Arc<Mutex<HashMap<u32, Duration>>>,
    }

    impl FakeClock {
        fn set(&self, pid: u32, secs: f64) {
            self.times.lock().unwrap().insert(pid, Duration::from_secs_f64(secs));
        }
    }

    impl ProcessClock for FakeClock {
        fn related_processes(&mut self, _root: u32) -> Vec<u32> {
            let mut pids: Vec<u32> = self.times.lock().unwrap().keys().copied().collect();
            pids.sort_unstable();
            pids
        }

        fn cpu_time(&mut self, pid: u32) -> Option<Duration> {
            self.times.lock().unwrap().get(&pid).copied()
        }
    }

    #[test]
    fn test_load_formula() {
        let load = cpu_load_percent(Duration::from_millis(2500), Duration::from_secs(5), 4);
        assert_relative_eq!(load, 12.5, epsilon = 1e-9);
        assert_eq!(cpu_load_percent(Duration::from_secs(1), Duration::ZERO, 4), 0.0);
    }

    #[test]
    fn test_tracker_sums_children_and_reseeds() {
        let clock = FakeClock::default();
        clock.set(100, 10.0);
        clock.set(101, 1.0);

        let mut tracker = CpuLoadTracker::with_cpus(Box::new(clock.clone()), 4);
        let t0 = Instant::now();
        tracker.reseed_at(100, t0);

        clock.set(100, 12.0);
        clock.set(101, 1.5);
        let load = tracker.sample_at(t0 + Duration::from_secs(5));
        assert_relative_eq!(load, 12.5, epsilon = 1e-9);

        // Only the latest interval counts
        clock.set(100, 12.5);
        let load = tracker.sample_at(t0 + Duration::from_secs(10));
        assert_relative_eq!(load, 2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_vanished_process_is_skipped() {
        let clock = FakeClock::default();
        clock.set(7, 0.0);
        clock.set(8, 0.0);
        let mut tracker = CpuLoadTracker::with_cpus(Box::new(clock.clone()), 2);
        let t0 = Instant::now();
        tracker.reseed_at(7, t0);

        clock.times.lock().unwrap().remove(&8);
        clock.set(7, 1.0);
        let load = tracker.sample_at(t0 + Duration::from_secs(1));
        assert_relative_eq!(load, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unseeded_tracker_reports_unknown() {
        let mut tracker = CpuLoadTracker::with_cpus(Box::new(FakeClock::default()), 4);
        assert_eq!(tracker.sample(), UNKNOWN_F64);
    }

    #[test]
    fn test_parse_stat_ticks() {
        let stat = "1234 (dotnet (worker)) S 1 1234 1234 0 -1 4194560 1000 0 0 0 250 50 0 0 20 0 12 0";
        assert_eq!(parse_stat_ticks(stat), Some(300));
        assert_eq!(parse_stat_ticks("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_clock_sees_current_process() {
        let mut clock = SystemProcessClock::new();
        let me = std::process::id();
        assert!(clock.related_processes(me).contains(&me));
        assert!(clock.cpu_time(me).is_some());
    }
}
