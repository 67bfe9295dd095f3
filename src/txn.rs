use crate::driver::{Identifier, Transaction};
use crate::operation::OperationKind;
use crate::trace::{error_of, run_task, TraceParams};
use opentelemetry::Context;
use std::ops::Deref;
use std::time::{Instant, SystemTime};
use tracing::{debug, error};

/// An instrumented wrapper around an open transaction
///
/// This struct provides the same operations as the wrapped transaction. Each
/// one emits a single span after the wrapped call returns, and statements
/// are rewritten with trace context comments according to the configured
/// propagation mode. Spans always show the statement as the caller wrote it.
///
/// # Example
///
/// ```rust,ignore
/// use opentelemetry::Context;
///
/// let cx = Context::current();
/// let mut tx = pool.begin(&cx).await?;
///
/// tx.exec(&cx, "INSERT INTO orders (id) VALUES ($1)", &[&42]).await?;
/// tx.commit(&cx).await?;
/// ```
pub struct TracedTx<T> {
    inner: T,
    params: TraceParams,
    began: Instant,
}

impl<T: Transaction> TracedTx<T> {
    /// Create a new instrumented transaction wrapper
    pub(crate) fn new(inner: T, params: TraceParams) -> Self {
        Self {
            inner,
            params,
            began: Instant::now(),
        }
    }

    /// Create a prepared statement named `name`
    ///
    /// The statement is annotated with service information only, since a
    /// prepared statement outlives any single trace.
    ///
    /// # Errors
    ///
    /// Returns the transaction's error unchanged if preparation fails
    pub async fn prepare(
        &mut self,
        cx: &Context,
        name: &str,
        sql: &str,
    ) -> Result<T::Statement, T::Error> {
        debug!(statement = name, "preparing statement in transaction");

        let start = SystemTime::now();
        let mode = self.params.config.propagation_mode().for_prepared_statement();
        let injected = self.params.inject_comments(cx, sql, mode);
        let result = run_task(
            OperationKind::Prepare,
            self.inner.prepare(name, &injected.query),
        )
        .await;
        self.params.try_trace(
            cx,
            OperationKind::Prepare,
            sql,
            start,
            error_of(&result),
            injected.options,
        );
        log_failure(OperationKind::Prepare, result)
    }

    /// Execute a statement without returning rows
    ///
    /// # Errors
    ///
    /// Returns the transaction's error unchanged if execution fails
    pub async fn exec(
        &mut self,
        cx: &Context,
        sql: &str,
        params: &[&T::Param],
    ) -> Result<T::CommandTag, T::Error> {
        debug!("executing statement in transaction");

        let start = SystemTime::now();
        let mode = self.params.config.propagation_mode();
        let injected = self.params.inject_comments(cx, sql, mode);
        let result = run_task(
            OperationKind::Exec,
            self.inner.exec(&injected.query, params),
        )
        .await;
        self.params.try_trace(
            cx,
            OperationKind::Exec,
            sql,
            start,
            error_of(&result),
            injected.options,
        );
        log_failure(OperationKind::Exec, result)
    }

    /// Execute a query and return its rows
    ///
    /// # Errors
    ///
    /// Returns the transaction's error unchanged if the query fails
    pub async fn query(
        &mut self,
        cx: &Context,
        sql: &str,
        params: &[&T::Param],
    ) -> Result<T::Rows, T::Error> {
        debug!("running query in transaction");

        let start = SystemTime::now();
        let mode = self.params.config.propagation_mode();
        let injected = self.params.inject_comments(cx, sql, mode);
        let result = run_task(
            OperationKind::Query,
            self.inner.query(&injected.query, params),
        )
        .await;
        self.params.try_trace(
            cx,
            OperationKind::Query,
            sql,
            start,
            error_of(&result),
            injected.options,
        );
        log_failure(OperationKind::Query, result)
    }

    /// Execute a query expected to return at most one row
    ///
    /// Errors surface when the row is read, so the span never carries one.
    pub async fn query_row(&mut self, cx: &Context, sql: &str, params: &[&T::Param]) -> T::Row {
        debug!("running single-row query in transaction");

        let start = SystemTime::now();
        let mode = self.params.config.propagation_mode();
        let injected = self.params.inject_comments(cx, sql, mode);
        let row = run_task(
            OperationKind::Query,
            self.inner.query_row(&injected.query, params),
        )
        .await;
        self.params
            .try_trace(cx, OperationKind::Query, sql, start, None, injected.options);
        row
    }

    /// Bulk-load rows into `table`, returning the number of rows copied
    ///
    /// # Errors
    ///
    /// Returns the transaction's error unchanged if the copy fails
    pub async fn copy_from(
        &mut self,
        cx: &Context,
        table: &Identifier,
        columns: &[&str],
        source: T::CopySource,
    ) -> Result<u64, T::Error> {
        debug!(table = %table, "copying rows in transaction");

        let start = SystemTime::now();
        let result = run_task(
            OperationKind::CopyFrom,
            self.inner.copy_from(table, columns, source),
        )
        .await;
        self.params.try_trace(
            cx,
            OperationKind::CopyFrom,
            &format!("copy_from {}", table.sanitize()),
            start,
            error_of(&result),
            Vec::new(),
        );
        log_failure(OperationKind::CopyFrom, result)
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns the transaction's error unchanged if the commit fails
    pub async fn commit(self, cx: &Context) -> Result<(), T::Error> {
        debug!("committing transaction");

        let start = SystemTime::now();
        let result = run_task(OperationKind::Commit, self.inner.commit()).await;
        self.params.try_trace(
            cx,
            OperationKind::Commit,
            "",
            start,
            error_of(&result),
            Vec::new(),
        );

        self.params
            .record_transaction_end(self.began.elapsed(), result.is_ok());

        log_failure(OperationKind::Commit, result)
    }

    /// Rollback the transaction
    ///
    /// # Errors
    ///
    /// Returns the transaction's error unchanged if the rollback fails
    pub async fn rollback(self, cx: &Context) -> Result<(), T::Error> {
        debug!("rolling back transaction");

        let start = SystemTime::now();
        let result = run_task(OperationKind::Rollback, self.inner.rollback()).await;
        self.params.try_trace(
            cx,
            OperationKind::Rollback,
            "",
            start,
            error_of(&result),
            Vec::new(),
        );

        self.params.record_transaction_end(self.began.elapsed(), false);

        log_failure(OperationKind::Rollback, result)
    }
}

impl<T> TracedTx<T> {
    /// Get a reference to the underlying transaction
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Get a mutable reference to the underlying transaction
    ///
    /// Calls made through it are not traced.
    #[must_use]
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Deref for TracedTx<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

fn log_failure<V, E: std::fmt::Display>(kind: OperationKind, result: Result<V, E>) -> Result<V, E> {
    if let Err(e) = &result {
        error!(operation = kind.as_str(), error = %e, "transaction operation failed");
    }
    result
}
