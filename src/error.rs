use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "batch.max_batch_size")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "smart_cache", "batch_processor")
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

/// Coarse classification used by callers that only care about the failure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    Validation,
    Serialization,
    Capacity,
    Configuration,
    Internal,
}

/// Unified error type for the optimization layer.
///
/// Transport failures keep their original shape so a batched or cached call
/// fails exactly like a direct call would.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression error: {message}")]
    Compression { message: String },

    #[error("Capacity error: entry of {required_bytes} bytes cannot fit in {max_bytes} bytes")]
    Capacity {
        required_bytes: usize,
        max_bytes: usize,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
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
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Error::Compression {
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(t) => match t {
                TransportError::Network(_) | TransportError::Other(_) => ErrorKind::Network,
                TransportError::Timeout { .. } => ErrorKind::Timeout,
                TransportError::Validation(_) => ErrorKind::Validation,
                TransportError::Status { .. } => ErrorKind::Network,
            },
            Error::Serialization(_) | Error::Yaml(_) | Error::Compression { .. } => {
                ErrorKind::Serialization
            }
            Error::Capacity { .. } => ErrorKind::Capacity,
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Io(_) | Error::Runtime { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the layer swallows this error (log and continue) rather than surfacing it.
    pub fn is_degradable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Serialization | ErrorKind::Capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_formatting() {
        let err = Error::configuration_with_context(
            "max_batch_size must be positive",
            ErrorContext::new()
                .with_field_path("batch.max_batch_size")
                .with_source("config"),
        );
        let msg = err.to_string();
        assert!(msg.contains("field: batch.max_batch_size"));
        assert!(msg.contains("source: config"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.context().is_some());
    }

    #[test]
    fn test_transport_kinds() {
        let timeout: Error = TransportError::Timeout { timeout_ms: 50 }.into();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(!timeout.is_degradable());

        let invalid: Error = TransportError::Validation("bad body".into()).into();
        assert_eq!(invalid.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_degradable_kinds() {
        let cap = Error::Capacity {
            required_bytes: 2048,
            max_bytes: 1024,
        };
        assert!(cap.is_degradable());
        assert!(Error::compression("truncated stream").is_degradable());
    }
}
