use crate::listener::ProxyStatus;
use std::fmt;
use thiserror::Error;

/// Where a configuration problem was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStage {
    /// `DispatcherConfig::validate`, run by every loader.
    Validate,
    /// Building the log filter in `init_tracing`.
    InitTracing,
}

impl ConfigStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStage::Validate => "validate",
            ConfigStage::InitTracing => "init_tracing",
        }
    }
}

/// The offending configuration key, plus whatever the failing parser said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigContext {
    /// Dotted key, e.g. `logging.filter`.
    pub field: &'static str,
    pub stage: ConfigStage,
    pub details: Option<String>,
}

impl ConfigContext {
    pub fn new(field: &'static str, stage: ConfigStage) -> Self {
        Self {
            field,
            stage,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ConfigContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field: {}", self.field)?;
        if let Some(details) = &self.details {
            write!(f, ", details: {details}")?;
        }
        write!(f, ", stage: {}", self.stage.as_str())
    }
}

/// Errors surfaced by the dispatch core.
///
/// Listener failures never appear here: they are contained by the dispatcher
/// and routed to a [`DiagnosticsSink`](crate::diagnostics::DiagnosticsSink).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message} ({context})")]
    Configuration {
        message: String,
        context: ConfigContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid status transition: {from} -> {to}")]
    StatusTransition { from: ProxyStatus, to: ProxyStatus },
}

impl Error {
    pub(crate) fn invalid_config(message: impl Into<String>, context: ConfigContext) -> Self {
        Error::Configuration {
            message: message.into(),
            context,
        }
    }

    /// The configuration key at fault, for `Configuration` errors.
    pub fn config_context(&self) -> Option<&ConfigContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_names_field_and_stage() {
        let err = Error::invalid_config(
            "slow listener threshold must be greater than zero",
            ConfigContext::new("slow_listener_threshold_ms", ConfigStage::Validate),
        );
        assert_eq!(
            err.to_string(),
            "Configuration error: slow listener threshold must be greater than zero \
             (field: slow_listener_threshold_ms, stage: validate)"
        );
        assert_eq!(
            err.config_context().map(|c| c.stage),
            Some(ConfigStage::Validate)
        );
    }

    #[test]
    fn parser_details_are_rendered() {
        let err = Error::invalid_config(
            "invalid log filter",
            ConfigContext::new("logging.filter", ConfigStage::InitTracing)
                .with_details("unexpected `=`"),
        );
        assert_eq!(
            err.to_string(),
            "Configuration error: invalid log filter \
             (field: logging.filter, details: unexpected `=`, stage: init_tracing)"
        );
    }

    #[test]
    fn io_errors_have_no_config_context() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.config_context().is_none());
    }
}
