use crate::resilience::BreakerError;
use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "breaker.name", "balance.items[1].weight")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "proxy_check", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the dispatch layer.
///
/// Only configuration errors are fatal. Breaker denials are recoverable and
/// transport errors are surfaced as-is. Non-2xx HTTP responses are never errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Circuit breaker rejected call: {0}")]
    Breaker(#[from] BreakerError),

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// True for deadline expiry or cancellation, wherever it was raised.
    pub fn is_deadline_or_cancel(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Breaker(e) => matches!(
                e,
                BreakerError::Timeout { .. } | BreakerError::Cancelled { .. }
            ),
            Error::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_renders_context() {
        let err = Error::configuration_with_context(
            "breaker name not defined",
            ErrorContext::new()
                .with_field_path("breaker.name")
                .with_source("breaker_config"),
        );
        let text = err.to_string();
        assert!(text.contains("breaker name not defined"));
        assert!(text.contains("field: breaker.name"));
        assert!(text.contains("source: breaker_config"));
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("breaker.name")
        );
    }

    #[test]
    fn test_context_is_omitted_when_empty() {
        let err = Error::configuration_with_context("bad", ErrorContext::new());
        assert_eq!(err.to_string(), "Configuration error: bad");
    }

    #[test]
    fn test_cancellation_counts_as_deadline() {
        assert!(Error::Cancelled.is_deadline_or_cancel());
        assert!(Error::Breaker(BreakerError::Timeout {
            name: "proxy".into(),
            timeout_ms: 10
        })
        .is_deadline_or_cancel());
        assert!(!Error::Breaker(BreakerError::Open {
            name: "proxy".into()
        })
        .is_deadline_or_cancel());
        assert!(!Error::Transport(TransportError::Other("reset".into())).is_deadline_or_cancel());
    }
}
