//! Bootstrap configuration file resolution and loading
//!
//! Resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. `IRONSIGHT_CONFIG` environment variable
//! 3. User config directory (`~/.config/ironsight/config.toml` on Linux)
//! 4. System config (`/etc/ironsight/config.toml`, Linux only)
//! 5. Compiled defaults (fallback)
//!
//! A missing config file is never fatal: the service starts on compiled
//! defaults with a warning. An explicitly requested file (CLI or env) that
//! does not exist is an error, since the operator asked for it by name.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "IRONSIGHT_CONFIG";

/// Where the bootstrap configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A TOML file on disk
    File(PathBuf),
    /// No file found; compiled defaults apply
    Defaults,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or full `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolves the bootstrap config file for one application
pub struct ConfigResolver {
    app_name: String,
}

impl ConfigResolver {
    /// Create a resolver for `app_name` (used as the config sub-directory)
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
        }
    }

    /// Resolve the configuration source
    ///
    /// # Errors
    /// Returns `Error::Config` when the CLI argument or environment variable
    /// names a file that does not exist.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Result<ConfigSource> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return Self::require_existing(path.to_path_buf(), "command line");
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Self::require_existing(PathBuf::from(path), CONFIG_ENV_VAR);
            }
        }

        // Priority 3/4: Platform locations
        for candidate in self.platform_candidates() {
            if candidate.exists() {
                info!("Using config file {}", candidate.display());
                return Ok(ConfigSource::File(candidate));
            }
        }

        // Priority 5: Compiled defaults
        warn!(
            "No config file found for {}, using compiled defaults",
            self.app_name
        );
        Ok(ConfigSource::Defaults)
    }

    fn require_existing(path: PathBuf, origin: &str) -> Result<ConfigSource> {
        if path.exists() {
            info!("Using config file {} (from {})", path.display(), origin);
            Ok(ConfigSource::File(path))
        } else {
            Err(Error::Config(format!(
                "Config file {} (from {}) does not exist",
                path.display(),
                origin
            )))
        }
    }

    fn platform_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join(&self.app_name).join("config.toml"));
        }
        if cfg!(target_os = "linux") {
            candidates.push(PathBuf::from("/etc").join(&self.app_name).join("config.toml"));
        }
        candidates
    }
}

/// Load a TOML document from the resolved source
///
/// `ConfigSource::Defaults` yields `T::default()`.
pub fn load_toml<T>(source: &ConfigSource) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match source {
        ConfigSource::File(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        }
        ConfigSource::Defaults => Ok(T::default()),
    }
}
