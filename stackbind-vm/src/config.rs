//! Runtime configuration - TOML file, environment overrides, defaults

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Maximum number of slots on one thread's stack
    #[serde(default = "default_max_stack")]
    pub max_stack: usize,

    /// Maximum nesting of native calls
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    /// Allocations between automatic collections; 0 disables them
    #[serde(default = "default_gc_threshold")]
    pub gc_threshold: usize,

    #[serde(default)]
    pub log: LogSettings,
}

/// Logging section of the config file (see `logging::LogConfig`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub file: Option<String>,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub spans: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack: default_max_stack(),
            max_call_depth: default_max_call_depth(),
            gc_threshold: default_gc_threshold(),
            log: LogSettings::default(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            json: false,
            spans: false,
        }
    }
}

fn default_max_stack() -> usize { 1_000_000 }
fn default_max_call_depth() -> usize { 200 }
fn default_gc_threshold() -> usize { 700 }
fn default_level() -> String { "info".to_string() }

impl VmConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults overridden by `STACKBIND_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `STACKBIND_*` environment variables; unparsable values are ignored
    pub fn apply_env(&mut self) {
        if let Some(n) = env_usize("STACKBIND_MAX_STACK") {
            self.max_stack = n;
        }
        if let Some(n) = env_usize("STACKBIND_MAX_CALL_DEPTH") {
            self.max_call_depth = n;
        }
        if let Some(n) = env_usize("STACKBIND_GC_THRESHOLD") {
            self.gc_threshold = n;
        }
        if let Ok(level) = std::env::var("STACKBIND_LOG_LEVEL") {
            self.log.level = level.to_lowercase();
        }
        if let Ok(path) = std::env::var("STACKBIND_LOG_FILE") {
            self.log.file = Some(path);
        }
        if std::env::var("STACKBIND_LOG_JSON").is_ok() {
            self.log.json = true;
        }
        if std::env::var("STACKBIND_LOG_SPANS").is_ok() {
            self.log.spans = true;
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}
