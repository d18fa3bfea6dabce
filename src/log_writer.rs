//! Timestamping log writer.
//!
//! Reads a child's output stream line by line and appends each line to the
//! shared log file as `[<local timestamp>] <line>`. Every record goes out in a
//! single `write_all` on an `O_APPEND` descriptor, so records from different
//! writers interleave only at line boundaries.

use crate::log_dir::LogTarget;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Longest line kept in memory before it is emitted without a newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in the log's timestamp format.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Build one log record: `[ts] line\n`. Trailing `\n` / `\r\n` are stripped from
/// `line`; everything else is passed through byte for byte.
pub fn format_line(ts: &str, line: &[u8]) -> Vec<u8> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut record = Vec::with_capacity(ts.len() + line.len() + 4);
    record.push(b'[');
    record.extend_from_slice(ts.as_bytes());
    record.extend_from_slice(b"] ");
    record.extend_from_slice(line);
    record.push(b'\n');
    record
}

/// `tracing-subscriber` timer that renders the same bracketed timestamp, so the
/// supervisor's own events line up with child output in the log file.
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketTime;

impl tracing_subscriber::fmt::time::FormatTime for BracketTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "[{}]", timestamp())
    }
}

/// Counters reported when a stream closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Records successfully appended.
    pub lines: u64,
    /// Records dropped because the write failed.
    pub dropped: u64,
}

impl PumpStats {
    fn merge(&mut self, other: PumpStats) {
        self.lines += other.lines;
        self.dropped += other.dropped;
    }
}

/// Copy `source` into `sink` one timestamped line at a time until EOF.
///
/// A write failure drops that line and keeps reading, so the child never
/// stalls on a full pipe because the disk is full.
pub async fn pump<R, W>(source: R, mut sink: W, process: &str) -> PumpStats
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut reader = BufReader::new(source);
    let mut line = Vec::new();
    let mut stats = PumpStats::default();

    loop {
        let available = match reader.fill_buf().await {
            Ok(buf) => buf,
            Err(e) => {
                tracing::warn!(process, error = %e, "failed to read process output");
                break;
            }
        };
        if available.is_empty() {
            break;
        }

        let room = MAX_LINE_BYTES - line.len();
        let (consumed, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) if i <= room => (i + 1, true),
            _ => (available.len().min(room), false),
        };
        line.extend_from_slice(&available[..consumed]);
        reader.consume(consumed);

        if complete || line.len() >= MAX_LINE_BYTES {
            emit(&mut sink, &line, process, &mut stats);
            line.clear();
        }
    }

    // Trailing partial line
    if !line.is_empty() {
        emit(&mut sink, &line, process, &mut stats);
    }
    stats
}

// Blocking write on the runtime thread. One append of at most a line is
// short enough that handing it to `spawn_blocking` would cost more than it saves.
fn emit<W: Write>(sink: &mut W, line: &[u8], process: &str, stats: &mut PumpStats) {
    let record = format_line(&timestamp(), line);
    match sink.write_all(&record) {
        Ok(()) => stats.lines += 1,
        Err(e) => {
            if stats.dropped == 0 {
                tracing::warn!(process, error = %e, "log write failed, dropping output lines");
            }
            stats.dropped += 1;
        }
    }
}

/// One writer per supervised process; each attached stream (stdout, stderr)
/// is pumped by its own task into the shared target.
pub struct TimestampWriter {
    process: String,
    target: LogTarget,
    streams: Vec<JoinHandle<PumpStats>>,
}

impl TimestampWriter {
    pub fn new(process: impl Into<String>, target: &LogTarget) -> Self {
        Self {
            process: process.into(),
            target: target.clone(),
            streams: Vec::new(),
        }
    }

    /// Start pumping `source` into the log target.
    pub fn attach<R>(&mut self, source: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let file = self.target.file();
        let process = self.process.clone();
        self.streams.push(tokio::spawn(async move {
            let file = file;
            pump(source, &*file, &process).await
        }));
    }

    /// Wait up to `within` for every stream to reach EOF. Streams still open
    /// after that (a grandchild holding the pipe, say) are aborted.
    pub async fn finish(self, within: Duration) -> PumpStats {
        let deadline = tokio::time::Instant::now() + within;
        let mut total = PumpStats::default();
        for mut handle in self.streams {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(stats)) => total.merge(stats),
                Ok(Err(e)) => {
                    tracing::warn!(process = %self.process, error = %e, "log writer task failed")
                }
                Err(_) => {
                    tracing::warn!(
                        process = %self.process,
                        "output stream still open after exit, abandoning it"
                    );
                    handle.abort();
                }
            }
        }
        if total.dropped > 0 {
            tracing::warn!(
                process = %self.process,
                lines = total.lines,
                dropped = total.dropped,
                "log writer finished with dropped lines"
            );
        } else {
            tracing::debug!(process = %self.process, lines = total.lines, "log writer finished");
        }
        total
    }
}
