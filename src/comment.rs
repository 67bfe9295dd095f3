//! SQL comment carrier for database monitoring correlation
//!
//! Trace context is written into the statement as a leading
//! [sqlcommenter](https://google.github.io/sqlcommenter/) block:
//!
//! ```text
//! /*dddbs='orders-db',dde='prod',traceparent='00-<trace id>-<span id>-01'*/ SELECT 1
//! ```
//!
//! The span identifier placed in the comment is generated here, before the
//! span it names exists. The span is only created once the database call has
//! returned, and it must reuse this identifier or the database-side record can
//! no longer be joined to the trace.

use crate::config::PropagationMode;
use crate::error::{InstrumentationError, InstrumentationResult};
use opentelemetry::trace::{SpanContext, SpanId, TraceId};
use std::fmt::Write as _;

const KEY_DB_SERVICE: &str = "dddbs";
const KEY_ENV: &str = "dde";
const KEY_PARENT_SERVICE: &str = "ddps";
const KEY_PARENT_VERSION: &str = "ddpv";
const KEY_TRACEPARENT: &str = "traceparent";

/// Writes trace context into a SQL statement as a comment
#[derive(Debug, Clone)]
pub struct SqlCommentCarrier {
    /// The statement, rewritten in place by [`inject`](Self::inject)
    pub query: String,
    pub mode: PropagationMode,
    /// Service name of the database being called
    pub db_service_name: String,
    pub env: Option<String>,
    pub version: Option<String>,
    /// Service name of the calling application
    pub parent_service: Option<String>,
    /// Identifier for the span that will describe this statement
    pub span_id: SpanId,
    /// Set when no ambient trace existed and a root trace id was minted
    pub trace_id: Option<TraceId>,
}

impl SqlCommentCarrier {
    #[must_use]
    pub fn new(
        query: impl Into<String>,
        mode: PropagationMode,
        db_service_name: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            mode,
            db_service_name: db_service_name.into(),
            env: None,
            version: None,
            parent_service: None,
            span_id: SpanId::INVALID,
            trace_id: None,
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: Option<&str>) -> Self {
        self.env = env.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = version.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_parent_service(mut self, service: Option<&str>) -> Self {
        self.parent_service = service.map(str::to_string);
        self
    }

    /// Generates a span id and rewrites `query` according to `mode`
    ///
    /// A span id is generated on every call, including when the mode is
    /// [`PropagationMode::Disabled`] or when injection fails, so the caller
    /// can always tag the eventual span with it.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentationError::Injection`] when `parent` is present but
    /// holds an invalid span context. The query is left unmodified.
    pub fn inject(&mut self, parent: Option<&SpanContext>) -> InstrumentationResult<()> {
        self.span_id = generate_span_id();
        self.trace_id = None;

        if self.mode == PropagationMode::Disabled {
            return Ok(());
        }

        if let Some(parent) = parent {
            if !parent.is_valid() {
                return Err(InstrumentationError::injection_error(
                    "ambient span context is invalid",
                ));
            }
        }

        let mut tags: Vec<(&str, String)> = Vec::with_capacity(5);
        tags.push((KEY_DB_SERVICE, self.db_service_name.clone()));
        if let Some(env) = non_empty(self.env.as_deref()) {
            tags.push((KEY_ENV, env.to_string()));
        }
        if let Some(service) = non_empty(self.parent_service.as_deref()) {
            tags.push((KEY_PARENT_SERVICE, service.to_string()));
        }
        if let Some(version) = non_empty(self.version.as_deref()) {
            tags.push((KEY_PARENT_VERSION, version.to_string()));
        }

        if self.mode == PropagationMode::Full {
            let (trace_id, sampled) = match parent {
                Some(parent) => (parent.trace_id(), parent.is_sampled()),
                None => {
                    // root statement: the span id doubles as the trace id
                    let minted = TraceId::from_bytes(
                        u128::from(u64::from_be_bytes(self.span_id.to_bytes())).to_be_bytes(),
                    );
                    self.trace_id = Some(minted);
                    (minted, false)
                }
            };
            tags.push((
                KEY_TRACEPARENT,
                encode_traceparent(trace_id, self.span_id, sampled),
            ));
        }

        self.query = comment_query(&self.query, &tags);
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// A random, non-zero span id
#[must_use]
pub fn generate_span_id() -> SpanId {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return SpanId::from_bytes(id.to_be_bytes());
        }
    }
}

/// W3C `traceparent` value, version 00
#[must_use]
pub fn encode_traceparent(trace_id: TraceId, span_id: SpanId, sampled: bool) -> String {
    format!(
        "00-{:032x}-{:016x}-{:02x}",
        u128::from_be_bytes(trace_id.to_bytes()),
        u64::from_be_bytes(span_id.to_bytes()),
        u8::from(sampled)
    )
}

/// Prepends the comment built from `tags` to `query`
///
/// Tags must already be in sqlcommenter (sorted) order.
fn comment_query(query: &str, tags: &[(&str, String)]) -> String {
    if tags.is_empty() {
        return query.to_string();
    }

    let mut comment = String::from("/*");
    for (i, (key, value)) in tags.iter().enumerate() {
        if i > 0 {
            comment.push(',');
        }
        let _ = write!(comment, "{}='{}'", query_escape(key), query_escape(value));
    }
    comment.push_str("*/");

    tracing::debug!(comment = %comment, "injected sql comment");

    if query.is_empty() {
        comment
    } else {
        format!("{comment} {query}")
    }
}

/// URL query escaping: unreserved bytes are kept, space becomes `+`
fn query_escape(value: &str) -> String {
    value
        .split(' ')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("+")
}
