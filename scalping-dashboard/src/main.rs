mod api;
mod config;
mod poller;
mod render;

use std::io::Write;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scalping_dashboard=info")),
        )
        .init();

    let cwd = std::env::current_dir().unwrap_or_default();
    let cfg = config::load_config(&cwd);

    let poller = match poller::Poller::new(&cfg.base_url, cfg.request_timeout()) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        "scalping-dashboard polling {} every {:?}",
        cfg.base_url,
        cfg.poll_interval()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    poller
        .run(
            cfg.poll_interval(),
            |snapshot| {
                let mut stdout = std::io::stdout().lock();
                let _ = write!(
                    stdout,
                    "{CLEAR_SCREEN}{}",
                    render::render(snapshot, cfg.log_tail_lines)
                );
                let _ = stdout.flush();
            },
            shutdown,
        )
        .await;
}
