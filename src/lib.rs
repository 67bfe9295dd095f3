/*!
`otel-instrumentation-pgpool` wraps a PostgreSQL connection pool and its transactions
with OpenTelemetry tracing and SQL comment trace propagation.

# Usage

The facades follow the standard Rust pattern of wrapping a type and delegating
methods while adding instrumentation. Any client that implements the
[`driver::Pool`] and [`driver::Transaction`] traits can be wrapped. With the
`postgres` feature, [`postgres`] provides an implementation backed by
`deadpool-postgres`.

# Example

```rust,ignore
use opentelemetry::Context;
use otel_instrumentation_pgpool::{PoolExt, PropagationMode, SpanTagsExt, TraceConfigBuilder};

let pool = my_pool.traced_with(
    TraceConfigBuilder::new()
        .with_service_name("orders-db")
        .with_propagation_mode(PropagationMode::Full)
        .build(),
);

let cx = Context::current().with_span_tags([("tenant", "acme")]);

let mut tx = pool.begin(&cx).await?;
tx.exec(&cx, "INSERT INTO orders (id) VALUES ($1)", &[&1_i64]).await?;
tx.commit(&cx).await?;
```

# How spans are produced

- Each operation emits at most one span, created after the wrapped call
  returns and started at the time the call began.
- SQL-bearing operations get a span id before the call; with propagation
  enabled the same id is written into the statement as a sqlcommenter comment,
  so database-side records can be joined back to the trace.
- Spans carry the statement exactly as the caller wrote it, never the
  commented version.
- Errors from the wrapped client are returned untouched.

*/
#![warn(clippy::all, clippy::pedantic)]

pub mod builder;
pub mod comment;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod ext;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod operation;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod trace;
pub mod txn;

pub use builder::TraceConfigBuilder;
pub use config::{ErrorCheck, PropagationMode, TraceConfig};
pub use context::{span_tags, with_span_tags, SpanTags};
pub use driver::{Identifier, Pool, Transaction};
pub use error::{InstrumentationError, InstrumentationResult};
pub use ext::{PoolExt, SpanTagsExt};
#[cfg(feature = "metrics")]
pub use metrics::PgMetrics;
pub use operation::OperationKind;
pub use pool::TracedPool;
pub use txn::TracedTx;

/// Component name reported on every span
pub const COMPONENT: &str = env!("CARGO_PKG_NAME");
