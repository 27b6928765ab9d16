//! Dispatcher configuration and logging setup.
//!
//! Configuration is plain serde data, loadable from YAML or JSON:
//!
//! ```yaml
//! enabled: true
//! slow_listener_threshold_ms: 50
//! logging:
//!   filter: "info,proxy_dispatch=debug"
//!   ansi: false
//! ```

use crate::error::{ConfigContext, ConfigStage};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a configuration file for [`DispatcherConfig::from_env`].
pub const CONFIG_PATH_ENV: &str = "PROXY_DISPATCH_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// When false, dispatch returns without invoking any listener.
    pub enabled: bool,
    /// Log a warning for listener callbacks slower than this. Observation only.
    pub slow_listener_threshold_ms: Option<u64>,
    pub logging: LoggingConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_listener_threshold_ms: None,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sub-millisecond thresholds round up to 1 ms; `Duration::ZERO` clears the threshold.
    pub fn with_slow_listener_threshold(mut self, threshold: Duration) -> Self {
        self.slow_listener_threshold_ms = if threshold.is_zero() {
            None
        } else {
            let ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
            if Duration::from_millis(ms) < threshold {
                Some(ms.saturating_add(1))
            } else {
                Some(ms)
            }
        };
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.logging.filter = filter.into();
        self
    }

    pub fn slow_listener_threshold(&self) -> Option<Duration> {
        self.slow_listener_threshold_ms.map(Duration::from_millis)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Load from the file named by `PROXY_DISPATCH_CONFIG`, or defaults if unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.slow_listener_threshold_ms == Some(0) {
            return Err(Error::invalid_config(
                "slow listener threshold must be greater than zero",
                ConfigContext::new("slow_listener_threshold_ms", ConfigStage::Validate),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(Error::invalid_config(
                "log filter must not be empty",
                ConfigContext::new("logging.filter", ConfigStage::Validate),
            ));
        }
        Ok(())
    }
}

/// Install a global `tracing` subscriber for `config`.
///
/// Returns `Ok(false)` if a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool> {
    use tracing_subscriber::EnvFilter;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            Error::invalid_config(
                "invalid log filter",
                ConfigContext::new("logging.filter", ConfigStage::InitTracing)
                    .with_details(e.to_string()),
            )
        })?,
    };

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init()
        .is_ok())
}
