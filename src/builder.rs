//! Builder pattern for configuring instrumented PostgreSQL pools
//!
//! This module provides a flexible API for assembling a [`TraceConfig`].
//! A tracer may be explicitly passed; when it is not, spans go to the tracer
//! registered with `opentelemetry::global` at the time each span is emitted.

use crate::config::{
    ErrorCheck, PropagationMode, TraceConfig, DEFAULT_SERVICE_NAME, DEFAULT_SPAN_NAME,
};
use crate::error::{InstrumentationError, InstrumentationResult};
use crate::operation::OperationKind;
use opentelemetry::global::BoxedTracer;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::sync::Arc;

/// Environment variable selecting the SQL comment propagation mode
pub const ENV_PROPAGATION_MODE: &str = "DD_DBM_PROPAGATION_MODE";
/// Environment variable enabling analytics with a sample rate of 1.0
pub const ENV_ANALYTICS_ENABLED: &str = "DD_TRACE_PGX_ANALYTICS_ENABLED";
/// Environment variable naming the calling application's service
pub const ENV_SERVICE: &str = "DD_SERVICE";
/// Environment variable naming the deployment environment
pub const ENV_ENV: &str = "DD_ENV";
/// Environment variable holding the application version
pub const ENV_VERSION: &str = "DD_VERSION";

/// Builder for a [`TraceConfig`]
///
/// # Example
///
/// ```rust
/// use otel_instrumentation_pgpool::{OperationKind, PropagationMode, TraceConfigBuilder};
///
/// let config = TraceConfigBuilder::new()
///     .with_service_name("orders-db")
///     .with_propagation_mode(PropagationMode::Full)
///     .with_ignored_operations([OperationKind::Rollback])
///     .with_tag("team", "payments")
///     .build();
///
/// assert_eq!(config.service_name(), "orders-db");
/// ```
pub struct TraceConfigBuilder {
    service_name: String,
    span_name: String,
    analytics_rate: Option<f64>,
    ignored_operations: HashSet<OperationKind>,
    child_spans_only: bool,
    error_check: Option<ErrorCheck>,
    tags: HashMap<String, String>,
    propagation_mode: PropagationMode,
    env: Option<String>,
    version: Option<String>,
    parent_service: Option<String>,
    tracer: Option<BoxedTracer>,
}

impl TraceConfigBuilder {
    /// Create a new builder with default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            span_name: DEFAULT_SPAN_NAME.to_string(),
            analytics_rate: None,
            ignored_operations: HashSet::new(),
            child_spans_only: false,
            error_check: None,
            tags: HashMap::new(),
            propagation_mode: PropagationMode::Disabled,
            env: None,
            version: None,
            parent_service: None,
            tracer: None,
        }
    }

    /// Create a builder seeded from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentationError::Configuration`] if a recognised
    /// variable holds a value that cannot be parsed.
    pub fn from_env() -> InstrumentationResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create a builder seeded from an arbitrary variable source
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentationError::Configuration`] if a recognised
    /// variable holds a value that cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> InstrumentationResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::new();

        if let Some(value) = get(ENV_PROPAGATION_MODE) {
            let mode = value.parse::<PropagationMode>().map_err(|e| {
                InstrumentationError::configuration_error(ENV_PROPAGATION_MODE, &value, e)
            })?;
            builder = builder.with_propagation_mode(mode);
        }

        if let Some(value) = get(ENV_ANALYTICS_ENABLED) {
            let enabled = parse_bool(&value).ok_or_else(|| {
                InstrumentationError::configuration_error(
                    ENV_ANALYTICS_ENABLED,
                    &value,
                    "expected a boolean",
                )
            })?;
            builder = builder.with_analytics(enabled);
        }

        builder.parent_service = get(ENV_SERVICE);
        builder.env = get(ENV_ENV);
        builder.version = get(ENV_VERSION);

        Ok(builder)
    }

    /// Set the database service name, reported on spans and in SQL comments
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the name given to every span
    #[must_use]
    pub fn with_span_name(mut self, name: impl Into<String>) -> Self {
        self.span_name = name.into();
        self
    }

    /// Add a static tag to every span
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add several static tags to every span
    #[must_use]
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Enable analytics with a sample rate of 1.0, or disable it
    #[must_use]
    pub fn with_analytics(mut self, enabled: bool) -> Self {
        self.analytics_rate = enabled.then_some(1.0);
        self
    }

    /// Set the analytics sample rate
    ///
    /// A rate outside `[0.0, 1.0]` (including NaN) leaves analytics unset.
    #[must_use]
    pub fn with_analytics_rate(mut self, rate: f64) -> Self {
        self.analytics_rate = (0.0..=1.0).contains(&rate).then_some(rate);
        self
    }

    /// Suppress spans entirely for the given operation kinds
    #[must_use]
    pub fn with_ignored_operations(
        mut self,
        kinds: impl IntoIterator<Item = OperationKind>,
    ) -> Self {
        self.ignored_operations.extend(kinds);
        self
    }

    /// Only create spans when the caller's context already holds a span
    #[must_use]
    pub fn with_child_spans_only(mut self, enabled: bool) -> Self {
        self.child_spans_only = enabled;
        self
    }

    /// Decide which errors mark the span as failed
    ///
    /// # Arguments
    ///
    /// * `check` - Returns `true` for errors that should be reported on the span
    #[must_use]
    pub fn with_error_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.error_check = Some(Arc::new(check));
        self
    }

    /// Set how much trace context is embedded in outgoing SQL
    #[must_use]
    pub fn with_propagation_mode(mut self, mode: PropagationMode) -> Self {
        self.propagation_mode = mode;
        self
    }

    /// Set the deployment environment embedded in SQL comments
    #[must_use]
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Set the application version embedded in SQL comments
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the calling application's service name embedded in SQL comments
    #[must_use]
    pub fn with_parent_service(mut self, service: impl Into<String>) -> Self {
        self.parent_service = Some(service.into());
        self
    }

    /// Add a tracer for span creation
    ///
    /// # Arguments
    ///
    /// * `tracer` - The BoxedTracer instance to use for creating spans
    #[must_use]
    pub fn with_tracer(mut self, tracer: BoxedTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Build the immutable configuration
    #[must_use]
    pub fn build(self) -> TraceConfig {
        TraceConfig {
            service_name: self.service_name,
            span_name: self.span_name,
            analytics_rate: self.analytics_rate,
            ignored_operations: self.ignored_operations,
            child_spans_only: self.child_spans_only,
            error_check: self.error_check,
            tags: self.tags,
            propagation_mode: self.propagation_mode,
            env: self.env,
            version: self.version,
            parent_service: self.parent_service,
            tracer: self.tracer,
        }
    }
}

impl Default for TraceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" => Some(true),
        "0" | "false" | "f" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_builder_defaults() {
        let builder = TraceConfigBuilder::new();
        assert!(builder.tracer.is_none());
        assert!(builder.error_check.is_none());
        assert_eq!(builder.service_name, DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn test_analytics_rate_bounds() {
        let config = TraceConfigBuilder::new().with_analytics_rate(0.25).build();
        assert_eq!(config.analytics_rate(), Some(0.25));

        let config = TraceConfigBuilder::new().with_analytics_rate(1.5).build();
        assert_eq!(config.analytics_rate(), None);

        let config = TraceConfigBuilder::new()
            .with_analytics_rate(f64::NAN)
            .build();
        assert_eq!(config.analytics_rate(), None);

        let config = TraceConfigBuilder::new()
            .with_analytics(true)
            .with_analytics(false)
            .build();
        assert_eq!(config.analytics_rate(), None);
    }

    #[test]
    fn test_tags_accumulate() {
        let config = TraceConfigBuilder::new()
            .with_tag("a", "1")
            .with_tags([("b", "2"), ("a", "3")])
            .build();
        assert_eq!(config.tags().get("a").map(String::as_str), Some("3"));
        assert_eq!(config.tags().get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_error_check_is_used() {
        let config = TraceConfigBuilder::new()
            .with_error_check(|err| err.to_string() != "no rows")
            .build();
        assert!(!config.is_reportable(&std::io::Error::other("no rows")));
        assert!(config.is_reportable(&std::io::Error::other("deadlock detected")));
    }

    #[test]
    fn test_from_lookup() {
        let config = TraceConfigBuilder::from_lookup(lookup(&[
            (ENV_PROPAGATION_MODE, "full"),
            (ENV_ANALYTICS_ENABLED, "true"),
            (ENV_SERVICE, "checkout"),
            (ENV_ENV, "staging"),
            (ENV_VERSION, ""),
        ]))
        .unwrap()
        .build();

        assert_eq!(config.propagation_mode(), PropagationMode::Full);
        assert_eq!(config.analytics_rate(), Some(1.0));
        assert_eq!(config.parent_service(), Some("checkout"));
        assert_eq!(config.env(), Some("staging"));
        assert_eq!(config.version(), None);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = TraceConfigBuilder::from_lookup(lookup(&[(ENV_PROPAGATION_MODE, "loud")]))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            InstrumentationError::Configuration { ref variable, ref value, .. }
                if variable == ENV_PROPAGATION_MODE && value == "loud"
        ));

        let err = TraceConfigBuilder::from_lookup(lookup(&[(ENV_ANALYTICS_ENABLED, "maybe")]))
            .err()
            .unwrap();
        assert!(matches!(err, InstrumentationError::Configuration { .. }));
    }
}
