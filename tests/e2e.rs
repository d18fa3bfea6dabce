//! End-to-end: run the real binary with three chatty processes, check the
//! shared log, stop it with SIGTERM and make sure nothing is left behind.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const CONFIG: &str = r#"
[logging]
dir = "logs"

[shutdown]
grace_period_ms = 3000

[[process]]
name = "web"
command = "sh"
args = ["-c", "echo \"pid $$\"; while true; do echo web tick; sleep 0.1; done"]
export_port = true

[[process]]
name = "worker"
command = "sh"
args = ["-c", "echo \"pid $$\"; while true; do echo worker tick; sleep 0.1; done"]

[[process]]
name = "strategist"
command = "sh"
args = ["-c", "echo \"pid $$\"; while true; do echo strategist tick >&2; sleep 0.1; done"]
"#;

fn start_supervisor(dir: &Path) -> Child {
    std::fs::write(dir.join("supervisor.toml"), CONFIG).unwrap();
    Command::new(env!("CARGO_BIN_EXE_scalping-supervisor"))
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    None
}

/// `[YYYY-MM-DD HH:MM:SS] ...`
fn is_well_formed(record: &str) -> bool {
    record.len() >= 22
        && record.starts_with('[')
        && &record[20..22] == "] "
        && chrono::NaiveDateTime::parse_from_str(&record[1..20], "%Y-%m-%d %H:%M:%S").is_ok()
}

fn run_and_stop_with(signal: Signal) {
    let dir = tempfile::tempdir().unwrap();
    let mut supervisor = start_supervisor(dir.path());

    std::thread::sleep(Duration::from_secs(1));

    let today = chrono::Local::now().date_naive();
    let log_file = dir
        .path()
        .join("logs")
        .join(format!("scalping-{}.log", today.format("%Y-%m-%d")));
    let contents = std::fs::read_to_string(&log_file).unwrap();
    // Writers are still appending; only judge complete lines.
    let contents = &contents[..contents.rfind('\n').map_or(0, |i| i + 1)];

    assert!(contents.lines().all(is_well_formed), "malformed log:\n{contents}");
    for name in ["web", "worker", "strategist"] {
        let ticks = contents
            .lines()
            .filter(|l| l.ends_with(&format!("] {name} tick")))
            .count();
        assert!(ticks >= 3, "expected ticks from {name}, got {ticks}:\n{contents}");
    }

    let child_pids: Vec<i32> = contents
        .lines()
        .filter_map(|l| l.split_once("] pid ").map(|(_, pid)| pid.trim().parse().unwrap()))
        .collect();
    assert_eq!(child_pids.len(), 3, "expected three pid lines:\n{contents}");

    kill(Pid::from_raw(supervisor.id() as i32), signal).unwrap();
    let status = wait_with_timeout(&mut supervisor, Duration::from_secs(10))
        .expect("supervisor did not exit within the grace period");
    assert!(status.success(), "supervisor exited with {status:?}");

    for pid in child_pids {
        assert_eq!(
            kill(Pid::from_raw(pid), None),
            Err(Errno::ESRCH),
            "child {pid} still running"
        );
    }

    let contents = std::fs::read_to_string(&log_file).unwrap();
    assert!(contents.lines().all(is_well_formed));
    assert!(contents.ends_with('\n'));
}

#[test]
fn test_supervisor_logs_all_processes_and_stops_on_sigterm() {
    run_and_stop_with(Signal::SIGTERM);
}

#[test]
fn test_supervisor_stops_on_sigint() {
    run_and_stop_with(Signal::SIGINT);
}

#[test]
fn test_missing_executable_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("supervisor.toml"),
        r#"
[[process]]
name = "web"
command = "sleep"
args = ["30"]

[[process]]
name = "worker"
command = "nonexistent-binary-xyz"
"#,
    )
    .unwrap();

    let mut supervisor = Command::new(env!("CARGO_BIN_EXE_scalping-supervisor"))
        .current_dir(dir.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let status = wait_with_timeout(&mut supervisor, Duration::from_secs(10))
        .expect("supervisor hung after launch failure");
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_invalid_config_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("supervisor.toml"), "[logging]\nretention_days = 0\n").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_scalping-supervisor"))
        .current_dir(dir.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
    assert!(!dir.path().join("logs").exists());
}
