//! Process group supervisor.
//!
//! Drives the `Starting → Running → Stopping → Stopped` lifecycle: sweep old
//! logs, launch every configured process in order, then wait on a single
//! `select!` for either a termination signal or the last child's exit. The
//! child registry belongs to the supervisor; signals reach it only as
//! messages on a channel.

use crate::config::SupervisorConfig;
use crate::group::GroupSignaler;
use crate::launcher::{self, LaunchError, SupervisedProcess};
use crate::log_dir::{LogDir, LogTarget};
use crate::signals::ShutdownSignal;
use crate::sweeper::{self, RetentionPolicy};
use nix::sys::signal::Signal;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// How long writers get to drain trailing output once their process is gone.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// How often the group is checked for leftover members during the grace period.
const GROUP_POLL: Duration = Duration::from_millis(50);

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl SupervisorState {
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Stopping, Stopped)
        )
    }
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Signal(ShutdownSignal),
    /// Every child exited without being asked to.
    ChildrenExited,
    LaunchFailed { process: String },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Signal(signal) => write!(f, "received {signal}"),
            StopReason::ChildrenExited => write!(f, "all processes exited"),
            StopReason::LaunchFailed { process } => write!(f, "failed to launch '{process}'"),
        }
    }
}

/// How one child ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildExit {
    pub name: String,
    pub pid: u32,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if the process was killed.
    pub signal: Option<i32>,
}

impl ChildExit {
    fn from_status(name: String, pid: u32, status: &std::io::Result<ExitStatus>) -> Self {
        let (code, signal) = match status {
            Ok(s) => (s.code(), s.signal()),
            Err(_) => (None, None),
        };
        Self {
            name,
            pid,
            code,
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Everything observable about a finished run.
#[derive(Debug)]
pub struct RunSummary {
    pub log_file: PathBuf,
    pub reason: StopReason,
    pub exits: Vec<ChildExit>,
    /// Every state entered, starting with `Starting`.
    pub transitions: Vec<SupervisorState>,
    /// Signals broadcast to the group, in order.
    pub broadcasts: Vec<Signal>,
}

impl RunSummary {
    /// Exit status for the supervisor process itself.
    pub fn exit_code(&self) -> u8 {
        match &self.reason {
            StopReason::Signal(_) => 0,
            StopReason::ChildrenExited if self.exits.iter().all(ChildExit::success) => 0,
            StopReason::ChildrenExited => 1,
            StopReason::LaunchFailed { .. } => 1,
        }
    }
}

/// Errors that end a supervisor run.
#[derive(Debug)]
pub enum SupervisorError {
    /// A required process could not be started. Siblings were stopped first.
    Launch {
        process: String,
        source: LaunchError,
        summary: RunSummary,
    },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::Launch {
                process, source, ..
            } => write!(f, "failed to launch process '{}': {}", process, source),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Launch { source, .. } => Some(source),
        }
    }
}

struct ChildOutcome {
    name: String,
    pid: u32,
    status: std::io::Result<ExitStatus>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    log_dir: LogDir,
    target: LogTarget,
    group: Box<dyn GroupSignaler>,
    state: SupervisorState,
    transitions: Vec<SupervisorState>,
    broadcasts: Vec<Signal>,
    reason: Option<StopReason>,
    children: Vec<SupervisedProcess>,
    exits: Vec<ChildExit>,
}

impl Supervisor {
    /// `target` is the already-open log file for this run; `group` decides how
    /// children are grouped and signalled.
    pub fn new(
        config: SupervisorConfig,
        target: LogTarget,
        group: Box<dyn GroupSignaler>,
    ) -> Self {
        let log_dir = LogDir::new(&config.logging.dir, &config.logging.file_prefix);
        Self {
            config,
            log_dir,
            target,
            group,
            state: SupervisorState::Starting,
            transitions: vec![SupervisorState::Starting],
            broadcasts: Vec::new(),
            reason: None,
            children: Vec::new(),
            exits: Vec::new(),
        }
    }

    /// Run to completion. Returns once every launched child has exited.
    pub async fn run(
        mut self,
        mut signals: UnboundedReceiver<ShutdownSignal>,
    ) -> Result<RunSummary, SupervisorError> {
        tracing::info!(
            log_file = %self.target.path().display(),
            processes = self.config.processes.len(),
            "supervisor starting"
        );

        let policy = RetentionPolicy::new(self.config.logging.retention_days);
        sweeper::sweep(&self.log_dir, policy, SystemTime::now());

        let mut failure = None;
        let specs = self.config.processes.clone();
        for spec in &specs {
            // A signal during startup stops further launches; whatever is
            // already running is tracked and gets the broadcast.
            if let Ok(signal) = signals.try_recv() {
                tracing::warn!(%signal, "termination signal during startup, not launching remaining processes");
                self.begin_stopping(StopReason::Signal(signal));
                break;
            }
            match launcher::launch(spec, &self.config.launch, &self.target, self.group.as_mut()) {
                Ok(process) => self.children.push(process),
                Err(e) => {
                    tracing::error!(process = %spec.name, error = %e, "launch failed, stopping already started processes");
                    failure = Some((spec.name.clone(), e));
                    self.begin_stopping(StopReason::LaunchFailed {
                        process: spec.name.clone(),
                    });
                    break;
                }
            }
        }

        // Children are only waited on once every launch is done, so the group
        // leader cannot be reaped while later children still need its pgid.
        let mut waits = self.start_waits();

        if self.state == SupervisorState::Starting {
            if let Ok(signal) = signals.try_recv() {
                self.begin_stopping(StopReason::Signal(signal));
            } else {
                self.transition(SupervisorState::Running);
                tracing::info!(processes = self.children.len(), "all processes running");
            }
        }

        self.wait_for_exits(&mut waits, &mut signals).await;
        self.finish_writers().await;

        if self.state == SupervisorState::Running {
            self.reason = Some(StopReason::ChildrenExited);
        }
        self.transition(SupervisorState::Stopped);

        let summary = RunSummary {
            log_file: self.target.path().to_path_buf(),
            reason: self.reason.clone().unwrap_or(StopReason::ChildrenExited),
            exits: std::mem::take(&mut self.exits),
            transitions: std::mem::take(&mut self.transitions),
            broadcasts: std::mem::take(&mut self.broadcasts),
        };
        tracing::info!(
            reason = %summary.reason,
            exit_code = summary.exit_code(),
            "supervisor stopped"
        );

        match failure {
            Some((process, source)) => Err(SupervisorError::Launch {
                process,
                source,
                summary,
            }),
            None => Ok(summary),
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = ?self.state, to = ?next, "ignoring invalid state transition");
            return;
        }
        tracing::debug!(from = ?self.state, to = ?next, "supervisor state change");
        self.state = next;
        self.transitions.push(next);
    }

    /// Enter `Stopping` and broadcast SIGTERM. Returns false, doing nothing,
    /// if shutdown is already under way.
    fn begin_stopping(&mut self, reason: StopReason) -> bool {
        if matches!(
            self.state,
            SupervisorState::Stopping | SupervisorState::Stopped
        ) {
            tracing::info!(%reason, "already stopping, ignoring");
            return false;
        }
        tracing::info!(%reason, "stopping all processes");
        self.reason = Some(reason);
        self.transition(SupervisorState::Stopping);
        self.broadcast(Signal::SIGTERM);
        true
    }

    fn broadcast(&mut self, signal: Signal) {
        self.broadcasts.push(signal);
        if let Err(e) = self.group.broadcast(signal) {
            tracing::warn!(error = %e, "group broadcast failed");
        }
    }

    fn start_waits(&mut self) -> JoinSet<ChildOutcome> {
        let mut waits = JoinSet::new();
        for process in &mut self.children {
            let Some(mut child) = process.take_child() else {
                continue;
            };
            let name = process.name.clone();
            let pid = process.pid;
            waits.spawn(async move {
                let status = child.wait().await;
                ChildOutcome { name, pid, status }
            });
        }
        waits
    }

    /// The supervisor's one long wait: signals, exits and the grace timer.
    async fn wait_for_exits(
        &mut self,
        waits: &mut JoinSet<ChildOutcome>,
        signals: &mut UnboundedReceiver<ShutdownSignal>,
    ) {
        let grace = Duration::from_millis(self.config.shutdown.grace_period_ms);
        let mut kill_at = (self.state == SupervisorState::Stopping).then(|| Instant::now() + grace);
        let mut signals_open = true;

        while !waits.is_empty() {
            let escalate_at = kill_at.unwrap_or_else(Instant::now);
            tokio::select! {
                received = signals.recv(), if signals_open => match received {
                    Some(signal) => {
                        if self.begin_stopping(StopReason::Signal(signal)) {
                            kill_at = Some(Instant::now() + grace);
                        }
                    }
                    None => signals_open = false,
                },
                Some(joined) = waits.join_next() => self.record_exit(joined),
                _ = tokio::time::sleep_until(escalate_at), if kill_at.is_some() => {
                    tracing::warn!(
                        remaining = waits.len(),
                        grace_ms = grace.as_millis() as u64,
                        "processes still running after grace period, sending SIGKILL"
                    );
                    self.broadcast(Signal::SIGKILL);
                    kill_at = None;
                }
            }
        }

        if let Some(deadline) = kill_at {
            self.wait_for_group(deadline).await;
        }
    }

    /// Every direct child is gone, but processes they spawned may still be in
    /// the group. Give them the rest of the grace period, then SIGKILL.
    async fn wait_for_group(&mut self, deadline: Instant) {
        while self.group.has_members() {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("group members still running after grace period, sending SIGKILL");
                self.broadcast(Signal::SIGKILL);
                return;
            }
            tokio::time::sleep(GROUP_POLL.min(deadline - now)).await;
        }
    }

    fn record_exit(&mut self, joined: Result<ChildOutcome, JoinError>) {
        let outcome = match joined {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(error = %e, "child wait task failed");
                return;
            }
        };
        self.group.forget(outcome.pid);
        let exit = ChildExit::from_status(outcome.name, outcome.pid, &outcome.status);

        if let Err(e) = &outcome.status {
            tracing::error!(process = %exit.name, pid = exit.pid, error = %e, "failed to wait for process");
        } else if self.state == SupervisorState::Running {
            // No restart: the remaining processes keep running.
            tracing::warn!(
                process = %exit.name,
                pid = exit.pid,
                code = ?exit.code,
                signal = ?exit.signal,
                "process exited unexpectedly"
            );
        } else {
            tracing::info!(
                process = %exit.name,
                pid = exit.pid,
                code = ?exit.code,
                signal = ?exit.signal,
                "process exited"
            );
        }
        self.exits.push(exit);
    }

    async fn finish_writers(&mut self) {
        for process in self.children.drain(..) {
            process.into_writer().finish(WRITER_DRAIN).await;
        }
    }
}
