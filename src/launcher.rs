//! Launching one supervised process: spawn it into the shared process group,
//! hook its stdout and stderr up to a timestamping writer, hand back a handle.

use crate::config::{LaunchConfig, ProcessConfig};
use crate::group::GroupSignaler;
use crate::log_dir::LogTarget;
use crate::log_writer::TimestampWriter;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A launched child. The OS handle is taken by the supervisor when it starts
/// waiting on the exit; name and pid stay for reporting.
pub struct SupervisedProcess {
    pub name: String,
    pub pid: u32,
    child: Option<Child>,
    writer: TimestampWriter,
}

impl SupervisedProcess {
    /// Take the process handle. Returns `None` if already taken.
    pub fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }

    /// The writer fed by this process's output.
    pub fn into_writer(self) -> TimestampWriter {
        self.writer
    }
}

/// Errors that can occur while launching a process.
#[derive(Debug)]
pub enum LaunchError {
    /// Failed to spawn the subprocess (missing executable, permissions, ...).
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The process exited before its pid could be read.
    NoPid,
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::Spawn { command, source } => {
                write!(f, "failed to spawn '{}': {}", command, source)
            }
            LaunchError::NoPid => write!(f, "process exited before its pid was known"),
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Spawn { source, .. } => Some(source),
            LaunchError::NoPid => None,
        }
    }
}

/// Port handed to the web server: `raw` (the supervisor's `PORT`) if it parses,
/// otherwise `default`.
pub fn resolve_port(raw: Option<&str>, default: u16) -> u16 {
    match raw.map(str::trim) {
        None | Some("") => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!(value, default, "PORT is not a valid port number, using default");
            default
        }),
    }
}

/// Spawn `spec` and attach its output to `target`.
///
/// Must be called inside a tokio runtime: the writer tasks are spawned here.
pub fn launch(
    spec: &ProcessConfig,
    launch: &LaunchConfig,
    target: &LogTarget,
    group: &mut dyn GroupSignaler,
) -> Result<SupervisedProcess, LaunchError> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .current_dir(&launch.working_dir)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if spec.export_port {
        let port = resolve_port(std::env::var("PORT").ok().as_deref(), launch.default_port);
        cmd.env("PORT", port.to_string());
    }
    if let Some(pgid) = group.placement() {
        cmd.process_group(pgid);
    }

    tracing::info!(
        process = %spec.name,
        command = %spec.command,
        args = ?spec.args,
        "launching process"
    );

    let mut child = cmd.spawn().map_err(|e| LaunchError::Spawn {
        command: spec.command.clone(),
        source: e,
    })?;

    let Some(pid) = child.id() else {
        return Err(LaunchError::NoPid);
    };
    group.track(pid);

    let mut writer = TimestampWriter::new(&spec.name, target);
    if let Some(stdout) = child.stdout.take() {
        writer.attach(stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        writer.attach(stderr);
    }

    tracing::info!(process = %spec.name, pid, "process started");

    Ok(SupervisedProcess {
        name: spec.name.clone(),
        pid,
        child: Some(child),
        writer,
    })
}
