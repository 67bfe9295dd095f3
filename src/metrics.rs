//! OpenTelemetry metrics support for PostgreSQL operations
//!
//! Metrics are recorded for every operation that reaches the wrapped client,
//! independent of span suppression.

use crate::operation::OperationKind;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::time::Duration;

/// Metrics collector for pool and transaction operations
#[derive(Clone, Debug)]
pub struct PgMetrics {
    /// Total number of operations executed
    operations_total: Counter<u64>,
    /// Duration of operations in milliseconds
    operation_duration: Histogram<f64>,
    /// Total number of failed operations
    errors_total: Counter<u64>,
    /// Total number of transactions started
    transactions_total: Counter<u64>,
    /// Lifetime of transactions in milliseconds, from begin to commit or rollback
    transaction_duration: Histogram<f64>,
    transaction_commits: Counter<u64>,
    transaction_rollbacks: Counter<u64>,
}

impl PgMetrics {
    /// Create a new metrics instance with the provided meter
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use opentelemetry::metrics::MeterProvider;
    /// use otel_instrumentation_pgpool::PgMetrics;
    ///
    /// let meter_provider = // ... initialize meter provider
    /// let meter = meter_provider.meter("postgres");
    /// let metrics = PgMetrics::new(&meter);
    /// ```
    #[must_use]
    pub fn new(meter: &Meter) -> Self {
        Self {
            operations_total: meter
                .u64_counter("pgpool.operations.total")
                .with_description("Total number of PostgreSQL operations executed")
                .build(),

            operation_duration: meter
                .f64_histogram("pgpool.operation.duration")
                .with_description("Duration of PostgreSQL operations in milliseconds")
                .build(),

            errors_total: meter
                .u64_counter("pgpool.errors.total")
                .with_description("Total number of failed PostgreSQL operations")
                .build(),

            transactions_total: meter
                .u64_counter("pgpool.transactions.total")
                .with_description("Total number of PostgreSQL transactions started")
                .build(),

            transaction_duration: meter
                .f64_histogram("pgpool.transaction.duration")
                .with_description("Duration of PostgreSQL transactions in milliseconds")
                .build(),

            transaction_commits: meter
                .u64_counter("pgpool.transaction.commits")
                .with_description("Number of successful transaction commits")
                .build(),

            transaction_rollbacks: meter
                .u64_counter("pgpool.transaction.rollbacks")
                .with_description("Number of transaction rollbacks")
                .build(),
        }
    }

    /// Record a completed operation
    ///
    /// # Arguments
    ///
    /// * `kind` - The operation that ran
    /// * `duration` - How long the wrapped call took
    /// * `success` - Whether the wrapped call returned without error
    pub fn record_operation(&self, kind: OperationKind, duration: Duration, success: bool) {
        let attributes = [
            KeyValue::new("operation", kind.as_str()),
            KeyValue::new("success", success),
        ];

        self.operations_total.add(1, &attributes);
        self.operation_duration
            .record(duration.as_secs_f64() * 1000.0, &attributes);

        if !success {
            self.errors_total.add(1, &attributes);
        }
    }

    pub fn record_transaction_start(&self) {
        self.transactions_total.add(1, &[]);
    }

    /// Record a transaction completion
    ///
    /// # Arguments
    ///
    /// * `duration` - Time since the transaction began
    /// * `committed` - Whether the transaction was committed (true) or rolled back (false)
    pub fn record_transaction_end(&self, duration: Duration, committed: bool) {
        let attributes = [KeyValue::new(
            "outcome",
            if committed { "commit" } else { "rollback" },
        )];

        self.transaction_duration
            .record(duration.as_secs_f64() * 1000.0, &attributes);

        if committed {
            self.transaction_commits.add(1, &attributes);
        } else {
            self.transaction_rollbacks.add(1, &attributes);
        }
    }
}
