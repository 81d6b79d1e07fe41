use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from keeper.toml.
///
/// Every threshold has a default matching the shipped container setup, so a
/// missing config file is not an error.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct KeeperConfig {
    pub worker: WorkerConfig,
    pub watch: WatchConfig,
    pub rotation: RotationConfig,
    pub patterns: PatternConfig,
    pub files: FileConfig,
}

/// Fallback worker command when no argv is passed on the command line.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Seconds a line must stay unchanged before an exit decision is evaluated.
    pub stability_timeout_secs: u64,
    /// How often the log follower polls the file for new bytes.
    pub poll_interval_ms: u64,
    /// Force-exit after this much total stall time, regardless of content.
    /// Disabled in the active policy.
    pub stall_ceiling_enabled: bool,
    pub stall_ceiling_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub max_log_lines: usize,
    pub trim_to_lines: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Fixed substring whose presence in the stable line is unrecoverable.
    pub fatal_marker: String,
    /// Marker preceding the failed-job counter in structured log lines.
    pub failure_count_marker: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub log_file: PathBuf,
    pub audit_log: PathBuf,
    pub status_file: PathBuf,
}

// --- Default implementations ---

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: "crawler".to_string(),
            args: vec![],
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stability_timeout_secs: 60,
            poll_interval_ms: 250,
            stall_ceiling_enabled: false,
            stall_ceiling_secs: 900,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_log_lines: 1000,
            trim_to_lines: 500,
        }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            fatal_marker: "fatal error".to_string(),
            failure_count_marker: "numOfJobsFailed\":".to_string(),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("worker.log"),
            audit_log: PathBuf::from("watchdog.log"),
            status_file: PathBuf::from("keeper.status"),
        }
    }
}

impl WatchConfig {
    pub fn stability_timeout(&self) -> Duration {
        Duration::from_secs(self.stability_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The hard stall ceiling, or None while the patient policy is active.
    pub fn stall_ceiling(&self) -> Option<Duration> {
        self.stall_ceiling_enabled
            .then(|| Duration::from_secs(self.stall_ceiling_secs))
    }
}

/// Errors that can occur while loading the config file.
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

/// Load configuration from the given path.
///
/// A missing file yields the defaults; an unreadable or malformed file is an
/// error the caller should treat as fatal at startup.
pub fn load(path: &Path) -> Result<KeeperConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(KeeperConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
