use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    /// Where the web server listens, e.g. `http://127.0.0.1:3000`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Trade log lines shown under the tables.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval(),
            request_timeout_ms: default_request_timeout(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

impl DashboardConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_base_url() -> String {
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    format!("http://127.0.0.1:{port}")
}
fn default_poll_interval() -> u64 {
    5000
}
fn default_request_timeout() -> u64 {
    4000
}
fn default_log_tail_lines() -> usize {
    20
}

/// Load config from dashboard.toml in the given directory, or default.
pub fn load_config(dir: &Path) -> DashboardConfig {
    let path = dir.join("dashboard.toml");
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<FileConfig>(&contents) {
            Ok(cfg) => cfg.dashboard,
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                DashboardConfig::default()
            }
        },
        Err(_) => DashboardConfig::default(),
    }
}
