//! Tracing configuration shared by a pool facade and every transaction it opens
//!
//! A [`TraceConfig`] is built once through [`TraceConfigBuilder`](crate::TraceConfigBuilder)
//! and is read-only afterwards, so it can be shared across concurrent callers
//! behind an `Arc` without locking.

use crate::operation::OperationKind;
use opentelemetry::global::{self, BoxedTracer};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default service name reported on spans and in SQL comments
pub const DEFAULT_SERVICE_NAME: &str = "postgres.db";

/// Default name given to every span
pub const DEFAULT_SPAN_NAME: &str = "pgx.query";

/// Predicate deciding whether an error is reported on the span
///
/// Returning `false` leaves the span without error status. The error itself
/// is still returned to the caller.
pub type ErrorCheck = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// How much trace context is embedded into outgoing SQL as a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PropagationMode {
    /// SQL is sent untouched
    #[default]
    Disabled,
    /// Only service identification is embedded
    Service,
    /// Service identification plus a W3C `traceparent`
    Full,
}

impl PropagationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PropagationMode::Disabled => "disabled",
            PropagationMode::Service => "service",
            PropagationMode::Full => "full",
        }
    }

    /// Prepared statements are reused across executions, so they never carry
    /// per-execution trace context.
    #[must_use]
    pub fn for_prepared_statement(self) -> Self {
        match self {
            PropagationMode::Full => PropagationMode::Service,
            other => other,
        }
    }
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropagationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(PropagationMode::Disabled),
            "service" => Ok(PropagationMode::Service),
            "full" => Ok(PropagationMode::Full),
            other => Err(format!(
                "unknown propagation mode '{other}', expected one of: disabled, service, full"
            )),
        }
    }
}

/// Immutable tracing configuration
pub struct TraceConfig {
    pub(crate) service_name: String,
    pub(crate) span_name: String,
    pub(crate) analytics_rate: Option<f64>,
    pub(crate) ignored_operations: HashSet<OperationKind>,
    pub(crate) child_spans_only: bool,
    pub(crate) error_check: Option<ErrorCheck>,
    pub(crate) tags: HashMap<String, String>,
    pub(crate) propagation_mode: PropagationMode,
    pub(crate) env: Option<String>,
    pub(crate) version: Option<String>,
    pub(crate) parent_service: Option<String>,
    pub(crate) tracer: Option<BoxedTracer>,
}

impl TraceConfig {
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    #[must_use]
    pub fn span_name(&self) -> &str {
        &self.span_name
    }

    /// The analytics sample rate, if one was configured
    #[must_use]
    pub fn analytics_rate(&self) -> Option<f64> {
        self.analytics_rate
    }

    #[must_use]
    pub fn ignored_operations(&self) -> &HashSet<OperationKind> {
        &self.ignored_operations
    }

    /// Whether spans are only created when the caller is already inside a trace
    #[must_use]
    pub fn child_spans_only(&self) -> bool {
        self.child_spans_only
    }

    #[must_use]
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    #[must_use]
    pub fn propagation_mode(&self) -> PropagationMode {
        self.propagation_mode
    }

    #[must_use]
    pub fn env(&self) -> Option<&str> {
        self.env.as_deref()
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn parent_service(&self) -> Option<&str> {
        self.parent_service.as_deref()
    }

    pub(crate) fn is_ignored(&self, kind: OperationKind) -> bool {
        self.ignored_operations.contains(&kind)
    }

    /// Whether `err` should mark the span as failed
    pub(crate) fn is_reportable(&self, err: &(dyn Error + 'static)) -> bool {
        self.error_check.as_ref().map_or(true, |check| check(err))
    }

    /// Runs `f` with the configured tracer, or the global one when none was passed
    pub(crate) fn with_tracer<R>(&self, f: impl FnOnce(&BoxedTracer) -> R) -> R {
        match &self.tracer {
            Some(tracer) => f(tracer),
            None => f(&global::tracer(crate::COMPONENT)),
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        crate::builder::TraceConfigBuilder::new().build()
    }
}

impl fmt::Debug for TraceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceConfig")
            .field("service_name", &self.service_name)
            .field("span_name", &self.span_name)
            .field("analytics_rate", &self.analytics_rate)
            .field("ignored_operations", &self.ignored_operations)
            .field("child_spans_only", &self.child_spans_only)
            .field("error_check", &self.error_check.is_some())
            .field("tags", &self.tags)
            .field("propagation_mode", &self.propagation_mode)
            .field("env", &self.env)
            .field("version", &self.version)
            .field("parent_service", &self.parent_service)
            .field("tracer", &self.tracer.is_some())
            .finish()
    }
}
