//! Error types for OpenTelemetry PostgreSQL instrumentation
//!
//! Errors returned by the wrapped database client are never converted into
//! these types; they flow back to the caller exactly as the driver produced them.

use std::fmt;

/// Errors that can occur during instrumentation setup or SQL comment injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentationError {
    /// Failed to parse instrumentation configuration from environment variables
    Configuration {
        /// The environment variable that failed to parse
        variable: String,
        /// The value that failed to parse
        value: String,
        /// The parsing error message
        error: String,
    },
    /// Trace context could not be embedded into the SQL text
    Injection {
        /// Why the carrier could not be written
        reason: String,
    },
}

impl fmt::Display for InstrumentationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentationError::Configuration {
                variable,
                value,
                error,
            } => {
                write!(
                    f,
                    "Failed to parse environment variable {variable}='{value}': {error}"
                )
            }
            InstrumentationError::Injection { reason } => {
                write!(f, "Failed to inject query comments: {reason}")
            }
        }
    }
}

impl std::error::Error for InstrumentationError {}

impl InstrumentationError {
    /// Create a new configuration error
    #[must_use]
    pub fn configuration_error(
        variable: impl Into<String>,
        value: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            variable: variable.into(),
            value: value.into(),
            error: error.into(),
        }
    }

    /// Create a new comment injection error
    #[must_use]
    pub fn injection_error(reason: impl Into<String>) -> Self {
        Self::Injection {
            reason: reason.into(),
        }
    }
}

/// Result type alias for instrumentation operations
pub type InstrumentationResult<T> = Result<T, InstrumentationError>;
