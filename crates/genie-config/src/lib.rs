//! Configuration file handling for Genie.
//!
//! This crate provides configuration loading from `.genie.toml` files with
//! support for merging with CLI arguments and defaults.
//!
//! # Example
//!
//! ```
//! use genie_config::{Config, load_config};
//! use std::path::Path;
//!
//! // Load config from a directory (looks for .genie.toml)
//! let config = load_config(Path::new(".")).expect("load config");
//!
//! if config.read_only() {
//!     println!("generated files will be read-only");
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = ".genie.toml";

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete genie configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Generation behavior configuration
    #[serde(default)]
    generate: GenerateConfig,
    /// Formatter configuration
    #[serde(default)]
    formatter: FormatterConfig,
    /// Validation configuration
    #[serde(default)]
    validate: ValidateConfig,
    /// Target lock configuration
    #[serde(default)]
    lock: LockConfig,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether generated files should end up read-only
    pub fn read_only(&self) -> bool {
        self.generate.read_only
    }

    /// Explicit formatter config path, if configured
    pub fn formatter_config(&self) -> Option<&Path> {
        self.formatter.config_path.as_deref()
    }

    /// Package-name globs excluded from recomposition validation
    pub fn validate_exclude(&self) -> &[String] {
        &self.validate.exclude
    }

    /// Target lock TTL
    pub fn lock_ttl(&self) -> Result<Duration> {
        match &self.lock.ttl {
            Some(text) => humantime::parse_duration(text)
                .with_context(|| format!("invalid lock.ttl duration: {}", text)),
            None => Ok(Duration::from_secs(120)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GenerateConfig {
    #[serde(default)]
    read_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FormatterConfig {
    #[serde(default)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ValidateConfig {
    #[serde(default)]
    exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LockConfig {
    /// Human-readable duration, e.g. "120s" or "2m"
    #[serde(default)]
    ttl: Option<String>,
}

/// Load configuration from a directory, looking for `.genie.toml`.
///
/// A missing file yields the defaults; a malformed file is an error.
pub fn load_config(dir: &Path) -> Result<Config> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
