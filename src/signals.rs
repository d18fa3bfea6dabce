//! Signal handling for coordinated shutdown.
//!
//! SIGINT (Ctrl-C) and SIGTERM are treated identically: each delivery becomes
//! one `ShutdownSignal` message on a channel owned by the supervisor. The
//! listener task never touches supervisor state directly.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Install SIGINT/SIGTERM handlers and return the receiving end of the channel
/// they feed. Must be called from within a tokio runtime.
///
/// Once installed, the default "terminate the process" disposition no longer
/// applies, so a signal that arrives while children are still being launched
/// is queued rather than orphaning them.
pub fn install() -> std::io::Result<mpsc::UnboundedReceiver<ShutdownSignal>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => ShutdownSignal::Interrupt,
                Some(()) = terminate.recv() => ShutdownSignal::Terminate,
                else => break,
            };
            tracing::debug!(signal = %received, "termination signal received");
            if tx.send(received).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
