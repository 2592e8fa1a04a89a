use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supervisor configuration, loaded from a TOML file and/or built by
/// the embedding application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Process-table title for the master. `None` leaves the OS default.
    pub master_title: Option<String>,
    /// Process-table title for each worker.
    pub worker_title: Option<String>,
    /// Uid to drop privileges to after startup.
    pub uid: Option<u32>,
    /// Gid to drop privileges to after startup.
    pub gid: Option<u32>,
    /// Desired steady-state pool size.
    pub worker_count: usize,
    /// How long a worker gets to exit cooperatively before SIGKILL.
    pub grace_period_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            master_title: None,
            worker_title: None,
            uid: None,
            gid: None,
            worker_count: 1,
            grace_period_ms: 5000,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Errors loading the config file.
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
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}
