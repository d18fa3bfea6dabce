use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from supervisor.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub logging: LoggingConfig,
    pub launch: LaunchConfig,
    pub shutdown: ShutdownConfig,
    #[serde(rename = "process")]
    pub processes: Vec<ProcessConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_prefix: String,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub working_dir: PathBuf,
    pub default_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long children get after SIGTERM before the group is sent SIGKILL.
    pub grace_period_ms: u64,
}

/// One supervised process. Launched in the order they appear in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Pass `PORT` to this process (the web server).
    #[serde(default)]
    pub export_port: bool,
}

/// Errors produced while loading or validating the configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load(path: &Path) -> Result<SupervisorConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(SupervisorConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    parse(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn parse(contents: &str) -> Result<SupervisorConfig, toml::de::Error> {
    toml::from_str(contents)
}

impl SupervisorConfig {
    /// Check the invariants the supervisor relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[process]] is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for process in &self.processes {
            if process.name.trim().is_empty() {
                return Err(ConfigError::Invalid("process name is empty".to_string()));
            }
            if !seen.insert(process.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate process name '{}'",
                    process.name
                )));
            }
            if process.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "process '{}' has an empty command",
                    process.name
                )));
            }
        }
        if self.logging.retention_days == 0 {
            return Err(ConfigError::Invalid(
                "logging.retention_days must be at least 1".to_string(),
            ));
        }
        let prefix = &self.logging.file_prefix;
        if prefix.is_empty() || prefix.contains('/') || prefix.contains('\\') {
            return Err(ConfigError::Invalid(format!(
                "logging.file_prefix '{prefix}' must be a plain file name prefix"
            )));
        }
        Ok(())
    }
}

// --- Default implementations ---

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            launch: LaunchConfig::default(),
            shutdown: ShutdownConfig::default(),
            processes: vec![
                ProcessConfig::python("web", "app.py", true),
                ProcessConfig::python("worker", "worker.py", false),
                ProcessConfig::python("strategist", "strategist.py", false),
            ],
        }
    }
}

impl ProcessConfig {
    fn python(name: &str, script: &str, export_port: bool) -> Self {
        Self {
            name: name.to_string(),
            command: "python3".to_string(),
            args: vec!["-u".to_string(), script.to_string()],
            env: BTreeMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())]),
            export_port,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "scalping".to_string(),
            retention_days: 5,
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            default_port: 3000,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_launch_web_worker_strategist_in_order() {
        let config = SupervisorConfig::default();
        let names: Vec<&str> = config.processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["web", "worker", "strategist"]);
        assert!(config.processes[0].export_port);
        assert!(!config.processes[1].export_port);
        assert_eq!(config.processes[2].args, vec!["-u", "strategist.py"]);
        assert_eq!(config.logging.dir, PathBuf::from("logs"));
        assert_eq!(config.logging.retention_days, 5);
        assert_eq!(config.launch.default_port, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.processes.len(), 3);
        assert_eq!(config.logging.file_prefix, "scalping");
        assert_eq!(config.shutdown.grace_period_ms, 10_000);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
[logging]
dir = "/var/log/scalping"

[shutdown]
grace_period_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(config.logging.dir, PathBuf::from("/var/log/scalping"));
        assert_eq!(config.logging.file_prefix, "scalping");
        assert_eq!(config.logging.retention_days, 5);
        assert_eq!(config.shutdown.grace_period_ms, 250);
        assert_eq!(config.processes.len(), 3);
    }

    #[test]
    fn test_process_tables_replace_defaults() {
        let config = parse(
            r#"
[[process]]
name = "web"
command = "gunicorn"
args = ["app:app"]
export_port = true
env = { FLASK_ENV = "production" }

[[process]]
name = "worker"
command = "python3"
"#,
        )
        .unwrap();
        assert_eq!(config.processes.len(), 2);
        assert_eq!(config.processes[0].command, "gunicorn");
        assert_eq!(
            config.processes[0].env.get("FLASK_ENV").map(String::as_str),
            Some("production")
        );
        assert!(config.processes[1].args.is_empty());
        assert!(!config.processes[1].export_port);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("supervisor.toml")).unwrap();
        assert_eq!(config.processes.len(), 3);
    }

    #[test]
    fn test_load_broken_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("supervisor.toml");
        std::fs::write(&path, "[logging\ndir = 3").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("supervisor.toml"));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = SupervisorConfig::default();
        config.processes[1].name = "web".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate process name 'web'"));
    }

    #[test]
    fn test_validate_rejects_empty_command_and_fleet() {
        let mut config = SupervisorConfig::default();
        config.processes[2].command = "  ".to_string();
        assert!(config.validate().is_err());

        config.processes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_logging_settings() {
        let mut config = SupervisorConfig::default();
        config.logging.retention_days = 0;
        assert!(config.validate().is_err());

        let mut config = SupervisorConfig::default();
        config.logging.file_prefix = "../escape".to_string();
        assert!(config.validate().is_err());
    }
}
