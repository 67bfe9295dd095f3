//! Extension traits for adding instrumentation to pools and contexts
//!
//! These traits allow wrapping an existing pool without naming
//! [`TracedPool`] directly, and attaching request-scoped span tags to an
//! OpenTelemetry [`Context`] with method syntax.

use crate::config::TraceConfig;
use crate::context::{self, SpanTags};
use crate::driver::Pool;
use crate::pool::TracedPool;
use opentelemetry::Context;

/// Extension trait for any [`Pool`] to add instrumentation capabilities
///
/// # Example
///
/// ```rust,ignore
/// use otel_instrumentation_pgpool::{PoolExt, PropagationMode, TraceConfigBuilder};
///
/// let traced = pool.traced_with(
///     TraceConfigBuilder::new()
///         .with_propagation_mode(PropagationMode::Full)
///         .build(),
/// );
/// ```
pub trait PoolExt: Pool + Sized {
    /// Wrap the pool using the default configuration
    fn traced(self) -> TracedPool<Self> {
        self.traced_with(TraceConfig::default())
    }

    /// Wrap the pool using `config`
    fn traced_with(self, config: TraceConfig) -> TracedPool<Self> {
        TracedPool::new(self, config)
    }
}

impl<P: Pool> PoolExt for P {}

/// Extension trait for [`Context`] to attach span tags
pub trait SpanTagsExt {
    /// Returns a context whose traced operations carry `tags` on their spans
    ///
    /// # Example
    ///
    /// ```rust
    /// use opentelemetry::Context;
    /// use otel_instrumentation_pgpool::{span_tags, SpanTagsExt};
    ///
    /// let cx = Context::new().with_span_tags([("tenant", "acme")]);
    /// assert_eq!(span_tags(&cx).and_then(|t| t.get("tenant")), Some("acme"));
    /// ```
    #[must_use]
    fn with_span_tags<I, K, V>(&self, tags: I) -> Context
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>;
}

impl SpanTagsExt for Context {
    fn with_span_tags<I, K, V>(&self, tags: I) -> Context
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        context::with_span_tags(self, tags.into_iter().collect::<SpanTags>())
    }
}
