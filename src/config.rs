//! Instrumentation configuration
//!
//! Loaded from an optional `rankfork.toml`, then overridden by environment
//! variables so a launcher can configure every rank the same way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "rankfork.toml";
pub const MODE_ENV: &str = "RANKFORK_MODE";
pub const TRACE_DIR_ENV: &str = "RANKFORK_TRACE_DIR";

/// What the interception layer does around each blocking call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Record descriptors without forking
    TraceOnly,
    /// Fork and park a checkpoint before every send and receive
    #[default]
    Checkpoint,
    /// Only resolve the rank at initialize; calls are forwarded untouched
    RankOnly,
}

impl Mode {
    /// Whether send/receive descriptors are recorded in this mode
    pub fn records_calls(&self) -> bool {
        !matches!(self, Mode::RankOnly)
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace-only" | "trace" => Ok(Mode::TraceOnly),
            "checkpoint" => Ok(Mode::Checkpoint),
            "rank-only" | "rank" => Ok(Mode::RankOnly),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::TraceOnly => write!(f, "trace-only"),
            Mode::Checkpoint => write!(f, "checkpoint"),
            Mode::RankOnly => write!(f, "rank-only"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct InstrumentConfig {
    pub mode: Mode,
    /// Directory receiving one JSON-lines trace file per rank
    pub trace_dir: Option<PathBuf>,
}

impl InstrumentConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            trace_dir: None,
        }
    }

    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(dir.into());
        self
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if it exists, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        let mut config = if path.exists() {
            Self::from_toml(&std::fs::read_to_string(&path)?)?
        } else {
            Self::default()
        };
        config.apply_overrides(
            std::env::var(MODE_ENV).ok().as_deref(),
            std::env::var(TRACE_DIR_ENV).ok().as_deref(),
        )?;
        Ok(config)
    }

    /// Defaults plus environment overrides, ignoring any config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(
            std::env::var(MODE_ENV).ok().as_deref(),
            std::env::var(TRACE_DIR_ENV).ok().as_deref(),
        )?;
        Ok(config)
    }

    /// Apply override values; empty strings are treated as unset
    pub fn apply_overrides(
        &mut self,
        mode: Option<&str>,
        trace_dir: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(mode) = mode.filter(|m| !m.trim().is_empty()) {
            self.mode = mode.parse()?;
        }
        if let Some(dir) = trace_dir.filter(|d| !d.trim().is_empty()) {
            self.trace_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }
}
