//! Daemon configuration.
//!
//! Loaded from a JSON document; validated and canonicalised before
//! anything else starts. `logLevel` can be overridden at runtime with
//! the `SCRYD_LOG` environment variable (a tracing filter directive).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::scry::ScryedDirectory;

/// Environment variable that overrides `logLevel` when set.
pub const LOG_ENV_VAR: &str = "SCRYD_LOG";

#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config i/o error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Absolute path every scryed directory is resolved against.
    #[serde(rename = "topDir")]
    pub top_dir: PathBuf,

    /// Directory holding the event database. Resolved relative to
    /// `topDir` when not absolute.
    #[serde(rename = "dbDir", default = "default_db_dir")]
    pub db_dir: PathBuf,

    /// One of trace/debug/info/warn/error (case-insensitive); anything
    /// unrecognised falls back to info.
    #[serde(rename = "logLevel", default)]
    pub log_level: Option<String>,

    #[serde(rename = "dirs", default)]
    pub dirs: Vec<ScryedDirectory>,
}

fn default_db_dir() -> PathBuf {
    PathBuf::from(".scryd-db")
}

impl Config {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&data).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate and canonicalise the configuration.
    ///
    /// Fails if `topDir` is empty, missing or not a directory, if any
    /// scryed directory does not resolve to an existing directory under
    /// it, or if any glob pattern fails to compile.
    pub fn validate(mut self) -> Result<Config, ConfigError> {
        if self.top_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("topDir is empty".to_string()));
        }
        self.top_dir = check_dir(&self.top_dir)?;

        for dir in &self.dirs {
            let full = self.top_dir.join(&dir.path);
            check_dir(&full)?;
            for pattern in dir.include.iter().chain(dir.exclude.iter()) {
                glob::Pattern::new(pattern).map_err(|e| {
                    ConfigError::Invalid(format!("bad glob pattern {:?}: {}", pattern, e))
                })?;
            }
        }

        if !self.db_dir.is_absolute() {
            self.db_dir = self.top_dir.join(&self.db_dir);
        }

        Ok(self)
    }

    /// The configured log level as a tracing level.
    pub fn log_level(&self) -> tracing::Level {
        parse_log_level(self.log_level.as_deref().unwrap_or("info"))
    }
}

fn check_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let meta = std::fs::symlink_metadata(path)
        .map_err(|e| ConfigError::Invalid(format!("failed to stat {}: {}", path.display(), e)))?;
    if !meta.is_dir() {
        return Err(ConfigError::Invalid(format!(
            "path is not a directory: {}",
            path.display()
        )));
    }
    path.canonicalize()
        .map_err(|e| ConfigError::Invalid(format!("failed to resolve {}: {}", path.display(), e)))
}

fn parse_log_level(s: &str) -> tracing::Level {
    match s.to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        // tracing has no level above error; "fatal" collapses into it
        "error" | "fatal" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
