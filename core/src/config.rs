//! Configuration loading and validation for the logging stack
//!
//! The core itself has nothing to tune except where its diagnostics go. A
//! host that does not bind its own sink through [`crate::bridge`] can load a
//! small TOML file instead:
//!
//! ```toml
//! logLevel = "debug"
//! logSink = "stderr"
//! ```

use crate::logging::{self, LogSink, StderrSink, TracingSink};
use crate::{Result, ShellError};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn default_log_level() -> String {
    "info".to_string()
}

/// Primary sink selected by configuration
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Forward to `tracing` (a fmt subscriber is installed)
    #[default]
    Tracing,
    /// Tagged lines straight to stderr
    Stderr,
}

/// Top-level TOML structure
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CoreConfig {
    /// `tracing` filter directive, e.g. `info` or `subshell_core=debug`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_sink: SinkKind,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_sink: SinkKind::default(),
        }
    }
}

impl CoreConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.log_level.trim().is_empty() {
            return Err(ShellError::ValidationError(
                "logLevel: cannot be empty".to_string(),
            ));
        }
        EnvFilter::try_new(&self.log_level).map_err(|e| {
            ShellError::ValidationError(format!("logLevel: invalid filter '{}': {}", self.log_level, e))
        })?;
        Ok(())
    }

    fn sink(&self) -> Box<dyn LogSink> {
        match self.log_sink {
            SinkKind::Tracing => Box::new(TracingSink),
            SinkKind::Stderr => Box::new(StderrSink),
        }
    }
}

/// Load config from a TOML file path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<CoreConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        ShellError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_config_from_toml_str(&data)
}

/// Load config from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<CoreConfig> {
    let cfg: CoreConfig = toml::from_str(input)
        .map_err(|e| ShellError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Install the configured logging stack and establish the primary sink
pub fn init_logging(config: &CoreConfig) -> Result<()> {
    config.validate()?;
    if logging::is_initialized() {
        return Err(ShellError::InitializationError(
            "primary log sink already established".to_string(),
        ));
    }
    if config.log_sink == SinkKind::Tracing {
        crate::utils::init_tracing(&config.log_level)?;
    }
    logging::init(config.sink())
}
