mod config;
mod group;
mod launcher;
mod log_dir;
mod log_writer;
mod signals;
mod supervisor;
mod sweeper;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Launches the web server, worker and strategist, writes their combined
/// output to a dated, timestamped log, and takes the whole group down on
/// SIGINT or SIGTERM.
#[derive(Parser, Debug)]
#[command(name = "scalping-supervisor", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "supervisor.toml")]
    config: PathBuf,

    /// Log directory (overrides config)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Delete rotated logs at least this many days old (overrides config)
    #[arg(long)]
    retention_days: Option<u32>,

    /// Milliseconds between SIGTERM and SIGKILL on shutdown (overrides config)
    #[arg(long)]
    grace_period_ms: Option<u64>,

    /// Signal each child individually instead of the shared process group
    #[arg(long)]
    per_child_signals: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (state changes, writer stats)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors from the supervisor itself
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut config::SupervisorConfig) {
        if let Some(dir) = &self.log_dir {
            config.logging.dir = dir.clone();
        }
        if let Some(days) = self.retention_days {
            config.logging.retention_days = days;
        }
        if let Some(ms) = self.grace_period_ms {
            config.shutdown.grace_period_ms = ms;
        }
    }

    fn default_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn init_tracing(cli: &Cli, target: &log_dir::LogTarget) {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.default_filter()))
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(filter()),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_timer(log_writer::BracketTime)
                .with_writer(target.file())
                .with_filter(filter()),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    cli.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        return ExitCode::from(2);
    }

    let log_dir = log_dir::LogDir::new(&config.logging.dir, &config.logging.file_prefix);
    let log_path = log_dir.today();

    if cli.dry_run {
        println!("scalping-supervisor v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        println!("Log file: {}", log_path.display());
        println!("{config:#?}");
        println!("Dry run mode, config validated, not running.");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = log_dir.ensure() {
        eprintln!(
            "error: failed to create log directory {}: {e}",
            log_dir.root().display()
        );
        return ExitCode::from(2);
    }
    let target = match log_dir::LogTarget::open(&log_path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: failed to open log file {}: {e}", log_path.display());
            return ExitCode::from(2);
        }
    };

    init_tracing(&cli, &target);
    tracing::debug!(?cli, "parsed CLI arguments");

    let signals = match signals::install() {
        Ok(rx) => rx,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let group: Box<dyn group::GroupSignaler> = if cli.per_child_signals {
        Box::new(group::PerChild::new())
    } else {
        Box::new(group::ProcessGroup::new())
    };
    let supervisor = supervisor::Supervisor::new(config, target, group);
    match supervisor.run(signals).await {
        Ok(summary) => {
            log_summary(&summary);
            ExitCode::from(summary.exit_code())
        }
        Err(e) => {
            tracing::error!(error = %e, "supervisor aborted");
            let supervisor::SupervisorError::Launch { summary, .. } = &e;
            log_summary(summary);
            ExitCode::from(summary.exit_code())
        }
    }
}

fn log_summary(summary: &supervisor::RunSummary) {
    tracing::debug!(
        log_file = %summary.log_file.display(),
        transitions = ?summary.transitions,
        broadcasts = ?summary.broadcasts,
        exits = summary.exits.len(),
        "run summary"
    );
}
