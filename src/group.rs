//! Delivering one signal to every supervised process at once.
//!
//! `ProcessGroup` puts all children into a single dedicated process group (the
//! first child becomes the leader) and signals it with `killpg`, which also
//! reaches anything the children spawned. `PerChild` signals each tracked pid
//! in turn for platforms or callers that cannot use process groups.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// Errors from a broadcast. "No such process" is not an error: it means the
/// targets are already gone.
#[derive(Debug)]
pub enum GroupError {
    Signal {
        target: i32,
        signal: Signal,
        source: Errno,
    },
}

impl std::fmt::Display for GroupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupError::Signal {
                target,
                signal,
                source,
            } => write!(f, "failed to send {signal} to {target}: {source}"),
        }
    }
}

impl std::error::Error for GroupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GroupError::Signal { source, .. } => Some(source),
        }
    }
}

/// The "terminate everything" capability the supervisor holds.
pub trait GroupSignaler: Send {
    /// Process group the next child should be placed in, as passed to
    /// `Command::process_group` (0 = become the leader of a new group).
    /// `None` leaves the child in the supervisor's own group.
    fn placement(&self) -> Option<i32>;

    /// Record a freshly spawned child.
    fn track(&mut self, pid: u32);

    /// Record that a child has exited and been reaped.
    fn forget(&mut self, pid: u32);

    /// Send `signal` to every tracked process.
    fn broadcast(&self, signal: Signal) -> Result<(), GroupError>;

    /// Whether anything that would receive a broadcast is still alive.
    fn has_members(&self) -> bool;
}

/// Signals a dedicated process group led by the first tracked child.
#[derive(Debug, Default)]
pub struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn pgid(&self) -> Option<i32> {
        self.pgid.map(Pid::as_raw)
    }
}

impl GroupSignaler for ProcessGroup {
    fn placement(&self) -> Option<i32> {
        Some(self.pgid.map_or(0, Pid::as_raw))
    }

    fn track(&mut self, pid: u32) {
        if self.pgid.is_none() {
            self.pgid = Some(Pid::from_raw(pid as i32));
        }
    }

    // The group id stays valid as long as any member (or the unreaped
    // leader) exists, so there is nothing to update here.
    fn forget(&mut self, _pid: u32) {}

    fn broadcast(&self, signal: Signal) -> Result<(), GroupError> {
        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        match killpg(pgid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(GroupError::Signal {
                target: -pgid.as_raw(),
                signal,
                source: e,
            }),
        }
    }

    // Covers grandchildren too: they stay in the group after their parent
    // has been reaped.
    fn has_members(&self) -> bool {
        self.pgid
            .is_some_and(|pgid| !matches!(killpg(pgid, None), Err(Errno::ESRCH)))
    }
}

/// Signals each tracked child individually.
#[derive(Debug, Default)]
pub struct PerChild {
    pids: Vec<Pid>,
}

impl PerChild {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GroupSignaler for PerChild {
    fn placement(&self) -> Option<i32> {
        None
    }

    fn track(&mut self, pid: u32) {
        self.pids.push(Pid::from_raw(pid as i32));
    }

    fn forget(&mut self, pid: u32) {
        self.pids.retain(|p| p.as_raw() != pid as i32);
    }

    fn broadcast(&self, signal: Signal) -> Result<(), GroupError> {
        let mut first_error = None;
        for &pid in &self.pids {
            match kill(pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => {
                    tracing::warn!(pid = pid.as_raw(), %signal, error = %e, "failed to signal child");
                    first_error.get_or_insert(GroupError::Signal {
                        target: pid.as_raw(),
                        signal,
                        source: e,
                    });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn has_members(&self) -> bool {
        self.pids
            .iter()
            .any(|&pid| !matches!(kill(pid, None), Err(Errno::ESRCH)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Stdio};

    fn spawn_sleeper(group: &mut dyn GroupSignaler) -> std::process::Child {
        use std::os::unix::process::CommandExt;
        let mut cmd = Command::new("sleep");
        cmd.arg("30").stdout(Stdio::null());
        if let Some(pgid) = group.placement() {
            cmd.process_group(pgid);
        }
        let child = cmd.spawn().unwrap();
        group.track(child.id());
        child
    }

    #[test]
    fn test_process_group_first_child_leads() {
        let mut group = ProcessGroup::new();
        assert_eq!(group.placement(), Some(0));
        assert_eq!(group.pgid(), None);

        group.track(4242);
        assert_eq!(group.pgid(), Some(4242));
        assert_eq!(group.placement(), Some(4242));

        group.track(4343);
        assert_eq!(group.pgid(), Some(4242));
    }

    #[test]
    fn test_broadcast_before_any_child_is_noop() {
        assert!(ProcessGroup::new().broadcast(Signal::SIGTERM).is_ok());
        assert!(PerChild::new().broadcast(Signal::SIGTERM).is_ok());
        assert!(!ProcessGroup::new().has_members());
        assert!(!PerChild::new().has_members());
    }

    #[test]
    fn test_process_group_broadcast_reaches_every_member() {
        let mut group = ProcessGroup::new();
        let mut first = spawn_sleeper(&mut group);
        let mut second = spawn_sleeper(&mut group);
        assert!(group.has_members());

        group.broadcast(Signal::SIGTERM).unwrap();

        assert_eq!(first.wait().unwrap().signal(), Some(Signal::SIGTERM as i32));
        assert_eq!(second.wait().unwrap().signal(), Some(Signal::SIGTERM as i32));

        // Group is gone now; a repeat broadcast is harmless.
        assert!(!group.has_members());
        assert!(group.broadcast(Signal::SIGTERM).is_ok());
    }

    #[test]
    fn test_per_child_broadcast_and_forget() {
        let mut group = PerChild::new();
        let mut first = spawn_sleeper(&mut group);
        let mut second = spawn_sleeper(&mut group);

        group.forget(second.id());
        group.broadcast(Signal::SIGTERM).unwrap();
        assert_eq!(first.wait().unwrap().signal(), Some(Signal::SIGTERM as i32));

        // The forgotten child was left alone.
        assert!(second.try_wait().unwrap().is_none());
        second.kill().unwrap();
        second.wait().unwrap();
    }

    #[test]
    fn test_group_error_display() {
        let err = GroupError::Signal {
            target: -100,
            signal: Signal::SIGTERM,
            source: Errno::EPERM,
        };
        let text = err.to_string();
        assert!(text.contains("SIGTERM"));
        assert!(text.contains("-100"));
    }
}
