//! Span emission shared by the pool and transaction facades
//!
//! Every traced operation runs in two phases. Before the wrapped call, SQL
//! comments are injected and a span id is fixed. After the call returns,
//! [`TraceParams::try_trace`] decides whether a span is recorded at all and,
//! if so, creates and ends it with the operation's real start time. A call
//! whose future is dropped before completion never reaches the second phase
//! and leaves no span behind.

use crate::comment::SqlCommentCarrier;
use crate::config::{PropagationMode, TraceConfig};
use crate::context::span_tags;
#[cfg(feature = "metrics")]
use crate::metrics::PgMetrics;
use crate::operation::OperationKind;
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceId, Tracer as _,
};
use opentelemetry::{Context, Key, KeyValue, Value};
use opentelemetry_semantic_conventions::attribute::{DB_OPERATION_NAME, DB_SYSTEM_NAME};
use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::Instrument;

/// Attribute keys written on every span
pub mod keys {
    pub const SERVICE_NAME: &str = "service.name";
    pub const SPAN_TYPE: &str = "span.type";
    pub const COMPONENT: &str = "component";
    pub const SPAN_KIND: &str = "span.kind";
    pub const RESOURCE_NAME: &str = "resource.name";
    /// Analytics event sample rate
    pub const EVENT_SAMPLE_RATE: &str = "_dd1.sr.eausr";
    /// Marks spans whose statement carried a full `traceparent` comment
    pub const DBM_TRACE_INJECTED: &str = "_dd.dbm_trace_injected";
}

const SPAN_TYPE_SQL: &str = "sql";
const SPAN_KIND_CLIENT: &str = "client";
const DB_SYSTEM_POSTGRESQL: &str = "postgresql";

/// Extra span settings supplied by the operation that produced the span
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StartOption {
    /// Use this id instead of generating one
    SpanId(SpanId),
    /// Use this trace id when the span has no parent
    TraceId(TraceId),
    Tag(KeyValue),
}

/// Result of rewriting a statement for propagation
#[derive(Debug, Clone)]
pub(crate) struct Injected {
    pub(crate) query: String,
    pub(crate) options: Vec<StartOption>,
}

/// Everything a facade needs to emit spans, shared by a pool and its transactions
#[derive(Clone, Debug)]
pub(crate) struct TraceParams {
    pub(crate) config: Arc<TraceConfig>,
    pub(crate) meta: Option<Arc<HashMap<String, String>>>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<Arc<PgMetrics>>,
}

impl TraceParams {
    pub(crate) fn new(config: Arc<TraceConfig>) -> Self {
        Self {
            config,
            meta: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn record_operation(&self, kind: OperationKind, start: SystemTime, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(kind, start.elapsed().unwrap_or_default(), success);
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn record_transaction_start(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transaction_start();
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn record_transaction_end(&self, lifetime: Duration, committed: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transaction_end(lifetime, committed);
        }
    }

    #[cfg(not(feature = "metrics"))]
    #[allow(clippy::unused_self)]
    pub(crate) fn record_operation(&self, _kind: OperationKind, _start: SystemTime, _success: bool) {}

    #[cfg(not(feature = "metrics"))]
    #[allow(clippy::unused_self)]
    pub(crate) fn record_transaction_start(&self) {}

    #[cfg(not(feature = "metrics"))]
    #[allow(clippy::unused_self)]
    pub(crate) fn record_transaction_end(&self, _lifetime: Duration, _committed: bool) {}

    /// Rewrites `query` for `mode` and returns the options the eventual span must carry
    ///
    /// Injection failures are logged and the statement is sent unmodified.
    pub(crate) fn inject_comments(
        &self,
        cx: &Context,
        query: &str,
        mode: PropagationMode,
    ) -> Injected {
        let config = &self.config;
        let mut carrier = SqlCommentCarrier::new(query, mode, config.service_name())
            .with_env(config.env())
            .with_version(config.version())
            .with_parent_service(config.parent_service());

        let parent = ambient_span(cx);
        if let Err(e) = carrier.inject(parent.as_ref()) {
            tracing::warn!(error = %e, "failed to inject query comments");
            carrier.query = query.to_string();
            carrier.trace_id = None;
        }

        let mut options = vec![StartOption::SpanId(carrier.span_id)];
        if let Some(trace_id) = carrier.trace_id {
            options.push(StartOption::TraceId(trace_id));
        }
        if mode == PropagationMode::Full {
            options.push(StartOption::Tag(KeyValue::new(
                keys::DBM_TRACE_INJECTED,
                true,
            )));
        }

        Injected {
            query: carrier.query,
            options,
        }
    }

    /// Records metrics for a finished operation and emits its span unless suppressed
    ///
    /// `sql` is the statement as the caller wrote it, never the rewritten one.
    pub(crate) fn try_trace(
        &self,
        cx: &Context,
        kind: OperationKind,
        sql: &str,
        start: SystemTime,
        err: Option<&(dyn Error + 'static)>,
        options: Vec<StartOption>,
    ) {
        self.record_operation(kind, start, err.is_none());

        let config = &self.config;
        if config.is_ignored(kind) {
            return;
        }
        let has_parent = has_ambient_span(cx);
        if config.child_spans_only && !has_parent {
            return;
        }

        let resource = if sql.is_empty() { kind.as_str() } else { sql };

        let mut attributes = Attributes::default();
        attributes.set(keys::SERVICE_NAME, config.service_name().to_string());
        attributes.set(keys::SPAN_TYPE, SPAN_TYPE_SQL);
        attributes.set(keys::COMPONENT, crate::COMPONENT);
        attributes.set(keys::SPAN_KIND, SPAN_KIND_CLIENT);
        attributes.set(DB_SYSTEM_NAME, DB_SYSTEM_POSTGRESQL);
        for (k, v) in config.tags() {
            attributes.set(k.clone(), v.clone());
        }
        if let Some(rate) = config.analytics_rate().filter(|r| !r.is_nan()) {
            attributes.set(keys::EVENT_SAMPLE_RATE, rate);
        }

        let mut span_id = None;
        let mut trace_id = None;
        for option in options {
            match option {
                StartOption::SpanId(id) => span_id = Some(id),
                StartOption::TraceId(id) => trace_id = Some(id),
                StartOption::Tag(kv) => attributes.set(kv.key, kv.value),
            }
        }

        attributes.set(DB_OPERATION_NAME, kind.as_str());
        attributes.set(keys::RESOURCE_NAME, resource.to_string());
        if let Some(meta) = &self.meta {
            for (k, v) in meta.iter() {
                attributes.set(k.clone(), v.clone());
            }
        }
        if let Some(tags) = span_tags(cx) {
            for (k, v) in tags.iter() {
                attributes.set(k.to_string(), v.to_string());
            }
        }

        // an active but invalid span context must not become the parent
        let root = Context::new();
        let parent = if has_parent { cx } else { &root };

        let mut span = config.with_tracer(|tracer| {
            let mut builder = tracer
                .span_builder(config.span_name().to_string())
                .with_kind(SpanKind::Client)
                .with_start_time(start)
                .with_attributes(attributes.into_vec());
            builder.span_id = span_id;
            builder.trace_id = trace_id;
            tracer.build_with_context(builder, parent)
        });

        if let Some(err) = err.filter(|e| config.is_reportable(*e)) {
            span.set_status(Status::error(err.to_string()));
            span.record_error(err);
        }

        span.end();
    }
}

/// Runs `fut` inside a DEBUG-level diagnostic span named after the operation
///
/// The diagnostic span covers only the wrapped call and is closed when the
/// future completes or is dropped, always before the operation's trace span
/// is emitted.
pub(crate) async fn run_task<F: Future>(kind: OperationKind, fut: F) -> F::Output {
    fut.instrument(tracing::debug_span!("pgpool.task", operation = kind.as_str()))
        .await
}

/// The error of `result`, as reported to [`TraceParams::try_trace`]
pub(crate) fn error_of<T, E>(result: &Result<T, E>) -> Option<&(dyn Error + 'static)>
where
    E: Error + 'static,
{
    match result {
        Ok(_) => None,
        Err(e) => Some(e),
    }
}

/// The span context of the caller's active span, valid or not
fn ambient_span(cx: &Context) -> Option<SpanContext> {
    cx.has_active_span()
        .then(|| cx.span().span_context().clone())
}

/// Whether `cx` holds an active span that can parent another
fn has_ambient_span(cx: &Context) -> bool {
    cx.has_active_span() && cx.span().span_context().is_valid()
}

/// Span attributes where a later write to a key replaces the earlier value
#[derive(Default)]
struct Attributes {
    values: Vec<KeyValue>,
    index: HashMap<Key, usize>,
}

impl Attributes {
    fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        let kv = KeyValue::new(key, value);
        match self.index.get(&kv.key) {
            Some(&i) => self.values[i] = kv,
            None => {
                self.index.insert(kv.key.clone(), self.values.len());
                self.values.push(kv);
            }
        }
    }

    fn into_vec(self) -> Vec<KeyValue> {
        self.values
    }
}
