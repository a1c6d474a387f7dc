//! Process supervision against real `sh` workers

#![cfg(unix)]

use rigkeeper_common::LogEvent;
use rigkeeperd::supervisor::{
    LaunchSpec, ProcessSignaller, ProcessSupervisor, StopMethod, SupervisorChannels, SupervisorOptions,
    UnixSignaller, WorkerExit, WorkerHost,
};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn options(stop_timeout: Duration) -> SupervisorOptions {
    SupervisorOptions {
        max_log_lines: 100,
        watchdog_interval: Duration::from_millis(100),
        stop_timeout,
        liveness_probe: Duration::from_millis(200),
    }
}

fn supervisor(stop_timeout: Duration) -> (ProcessSupervisor, SupervisorChannels) {
    ProcessSupervisor::new(options(stop_timeout), Arc::new(UnixSignaller))
}

fn shell(dir: &Path, script: &str) -> LaunchSpec {
    LaunchSpec {
        working_dir: dir.to_path_buf(),
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        prelaunch_script: None,
        prelaunch_file: "prelaunch.sh".to_string(),
    }
}

/// Appended lines until `last` shows up
async fn lines_until(logs: &mut mpsc::UnboundedReceiver<LogEvent>, last: &str) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), logs.recv())
            .await
            .expect("timed out waiting for worker output")
            .expect("log channel closed");
        if let LogEvent::Appended(update) = event {
            let done = update.line == last;
            lines.push(update.line);
            if done {
                return lines;
            }
        }
    }
}

async fn next_exit(exits: &mut mpsc::UnboundedReceiver<WorkerExit>) -> WorkerExit {
    timeout(Duration::from_secs(5), exits.recv())
        .await
        .expect("timed out waiting for exit")
        .expect("exit channel closed")
}

#[tokio::test]
async fn test_interrupt_stops_worker_gracefully() {
    let dir = tempdir().unwrap();
    let (supervisor, mut channels) = supervisor(Duration::from_secs(5));
    let spec = shell(
        dir.path(),
        "trap 'echo bye; exit 0' INT; echo one; echo two; while true; do sleep 0.1; done",
    );

    assert!(supervisor.start(&spec).await);
    assert!(supervisor.is_running().await);
    let pid = supervisor.pid().unwrap();

    assert_eq!(channels.logs.recv().await, Some(LogEvent::Cleared));
    assert_eq!(lines_until(&mut channels.logs, "two").await, vec!["one", "two"]);

    assert!(supervisor.stop().await);
    assert_eq!(next_exit(&mut channels.exits).await, WorkerExit { pid, code: Some(0) });
    assert!(!supervisor.is_running().await);
    assert_eq!(supervisor.pid(), None);

    // Reported once per run
    assert!(supervisor.stop().await);
    assert!(channels.exits.try_recv().is_err());
}

#[tokio::test]
async fn test_ignored_interrupt_escalates_to_kill() {
    let dir = tempdir().unwrap();
    let (supervisor, mut channels) = supervisor(Duration::from_millis(500));
    let spec = shell(dir.path(), "trap '' INT; echo ready; while true; do sleep 0.1; done");

    assert!(supervisor.start(&spec).await);
    let pid = supervisor.pid().unwrap();
    lines_until(&mut channels.logs, "ready").await;

    assert!(!supervisor.stop().await);
    let exit = next_exit(&mut channels.exits).await;
    assert_eq!(exit.pid, pid);
    assert_eq!(exit.code, None);
    assert!(!supervisor.is_running().await);
}

#[tokio::test]
async fn test_watchdog_reports_unexpected_exit() {
    let dir = tempdir().unwrap();
    let (supervisor, mut channels) = supervisor(Duration::from_secs(5));
    let spec = shell(dir.path(), "echo working; sleep 0.5; exit 7");

    assert!(supervisor.start(&spec).await);
    let pid = supervisor.pid().unwrap();

    assert_eq!(next_exit(&mut channels.exits).await, WorkerExit { pid, code: Some(7) });
    assert!(!supervisor.is_running().await);
    assert!(supervisor.stop().await);
    assert!(channels.exits.try_recv().is_err());
}

#[tokio::test]
async fn test_early_exit_fails_start() {
    let dir = tempdir().unwrap();
    let (supervisor, mut channels) = supervisor(Duration::from_secs(5));

    assert!(!supervisor.start(&shell(dir.path(), "exit 3")).await);
    assert!(!supervisor.is_running().await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(channels.exits.try_recv().is_err());
}

#[tokio::test]
async fn test_missing_program_fails_start() {
    let dir = tempdir().unwrap();
    let (supervisor, mut channels) = supervisor(Duration::from_secs(5));
    let spec = LaunchSpec {
        program: "/nonexistent/rigkeeper-worker".to_string(),
        args: Vec::new(),
        ..shell(dir.path(), "")
    };

    assert!(!supervisor.start(&spec).await);
    assert_eq!(supervisor.pid(), None);
    assert!(channels.exits.try_recv().is_err());
}

#[tokio::test]
async fn test_second_start_is_refused_while_running() {
    let dir = tempdir().unwrap();
    let (supervisor, _channels) = supervisor(Duration::from_secs(5));
    let spec = shell(dir.path(), "trap 'exit 0' INT; while true; do sleep 0.1; done");

    assert!(supervisor.start(&spec).await);
    let pid = supervisor.pid();
    assert!(!supervisor.start(&spec).await);
    assert_eq!(supervisor.pid(), pid);

    assert!(supervisor.stop().await);
}

#[tokio::test]
async fn test_prelaunch_runs_before_worker() {
    let dir = tempdir().unwrap();
    let (supervisor, mut channels) = supervisor(Duration::from_secs(5));
    let spec = LaunchSpec {
        prelaunch_script: Some("echo prepared > marker.txt\n".to_string()),
        ..shell(
            dir.path(),
            "trap 'exit 0' INT; cat marker.txt; echo done; while true; do sleep 0.1; done",
        )
    };

    assert!(supervisor.start(&spec).await);
    assert_eq!(lines_until(&mut channels.logs, "done").await, vec!["prepared", "done"]);
    assert!(!dir.path().join("prelaunch.sh").exists());

    assert!(supervisor.stop().await);
}

#[tokio::test]
async fn test_log_capacity_and_clear() {
    let dir = tempdir().unwrap();
    let (supervisor, mut channels) = ProcessSupervisor::new(
        SupervisorOptions {
            max_log_lines: 3,
            ..options(Duration::from_secs(5))
        },
        Arc::new(UnixSignaller),
    );
    let spec = shell(
        dir.path(),
        "trap 'exit 0' INT; for i in 1 2 3 4 5; do echo line$i; done; while true; do sleep 0.1; done",
    );

    assert!(supervisor.start(&spec).await);
    lines_until(&mut channels.logs, "line5").await;
    assert_eq!(supervisor.log_text(), "line3\nline4\nline5\n");

    supervisor.clear_logs();
    assert_eq!(channels.logs.recv().await, Some(LogEvent::Cleared));
    assert_eq!(supervisor.log_text(), "");

    assert!(supervisor.stop().await);
}

/// Unix signalling that records the graceful steps it was asked to undo
#[derive(Debug, Default)]
struct RecordingSignaller {
    released: Mutex<Vec<(u32, StopMethod)>>,
}

impl ProcessSignaller for RecordingSignaller {
    fn graceful_method(&self, pid: u32) -> Option<StopMethod> {
        UnixSignaller.graceful_method(pid)
    }

    fn signal(&self, pid: u32, method: StopMethod) -> io::Result<()> {
        UnixSignaller.signal(pid, method)
    }

    fn release(&self, pid: u32, method: StopMethod) {
        self.released.lock().unwrap().push((pid, method));
    }

    fn sweep(&self, pid: u32) -> io::Result<bool> {
        UnixSignaller.sweep(pid)
    }
}

#[tokio::test]
async fn test_graceful_step_is_released_after_wait() {
    let dir = tempdir().unwrap();
    let signaller = Arc::new(RecordingSignaller::default());
    let (supervisor, mut channels) = ProcessSupervisor::new(options(Duration::from_secs(5)), signaller.clone());
    let spec = shell(dir.path(), "trap 'exit 0' INT; echo ready; while true; do sleep 0.1; done");

    assert!(supervisor.start(&spec).await);
    let pid = supervisor.pid().unwrap();
    lines_until(&mut channels.logs, "ready").await;

    assert!(supervisor.stop().await);
    assert_eq!(
        *signaller.released.lock().unwrap(),
        vec![(pid, StopMethod::CooperativeInterrupt)]
    );
}

/// Dead or a zombie waiting for its new parent to reap it
#[cfg(target_os = "linux")]
fn is_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rfind(')')
            .map(|end| stat[end + 1..].trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => true,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_leftover_children_are_swept_after_exit() {
    let dir = tempdir().unwrap();
    let (supervisor, mut channels) = supervisor(Duration::from_secs(5));
    let spec = shell(dir.path(), "sleep 30 & echo $!; sleep 0.5; exit 4");

    assert!(supervisor.start(&spec).await);
    let pid = supervisor.pid().unwrap();
    let child: u32 = loop {
        let event = timeout(Duration::from_secs(5), channels.logs.recv())
            .await
            .expect("timed out waiting for child pid")
            .expect("log channel closed");
        if let LogEvent::Appended(update) = event {
            break update.line.trim().parse().unwrap();
        }
    };
    assert!(!is_gone(child));

    assert_eq!(next_exit(&mut channels.exits).await, WorkerExit { pid, code: Some(4) });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !is_gone(child) {
        assert!(tokio::time::Instant::now() < deadline, "child {} outlived its worker", child);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
