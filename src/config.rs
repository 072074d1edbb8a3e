//! Configuration management for rampart

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trust database location
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Mount points to gate
    #[serde(default = "default_mounts")]
    pub mounts: Vec<PathBuf>,

    /// Paths/patterns never mediated
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Burst detection tuning
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            mounts: default_mounts(),
            exclude: Vec::new(),
            detection: DetectionConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults on any failure.
    ///
    /// A broken config file must never keep the agent down; the fallback is
    /// logged so the operator can see which settings are actually live.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("config {:?} unusable ({}), using defaults", path, e);
                Config::default()
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check if a path is excluded from mediation
    pub fn is_excluded(&self, path: &Path) -> bool {
        for pattern in &self.exclude {
            if let Ok(glob) = globset::Glob::new(pattern) {
                if glob.compile_matcher().is_match(path) {
                    return true;
                }
            }
        }
        false
    }
}

/// Burst detection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Sliding window over which bursts are counted, in milliseconds.
    /// Zero disables behavioral detection entirely (list-only mode).
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,

    /// Distinct files written inside one directory within the window
    /// before the actor is distrusted
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            burst_threshold: default_burst_threshold(),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// PID file path
    #[serde(default = "default_pid_path")]
    pub pid_file: PathBuf,

    /// Log file path (used when daemonized)
    #[serde(default = "default_log_path")]
    pub log_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_path(),
            log_file: default_log_path(),
        }
    }
}

// Default value functions for serde

fn default_database() -> PathBuf {
    PathBuf::from("/var/lib/rampart/trust.db")
}

fn default_mounts() -> Vec<PathBuf> {
    vec![PathBuf::from("/home")]
}

fn default_window_ms() -> i64 {
    1000
}

fn default_burst_threshold() -> usize {
    3
}

fn default_pid_path() -> PathBuf {
    PathBuf::from("/run/rampart.pid")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/rampart.log")
}
