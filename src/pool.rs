use crate::config::TraceConfig;
use crate::driver::Pool;
#[cfg(feature = "metrics")]
use crate::metrics::PgMetrics;
use crate::operation::OperationKind;
use crate::trace::{error_of, run_task, TraceParams};
use crate::txn::TracedTx;
#[cfg(feature = "metrics")]
use opentelemetry::metrics::Meter;
use opentelemetry::Context;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error};

/// A wrapper around a connection pool that traces every transaction it opens
///
/// Methods not overridden here are reachable through `Deref` and run untraced.
pub struct TracedPool<P> {
    inner: P,
    params: TraceParams,
}

impl<P: Pool> TracedPool<P> {
    /// Wraps `pool`, emitting spans according to `config`
    #[must_use]
    pub fn new(pool: P, config: TraceConfig) -> Self {
        Self::with_shared_config(pool, Arc::new(config))
    }

    /// Wraps `pool` with a configuration already shared with other facades
    #[must_use]
    pub fn with_shared_config(pool: P, config: Arc<TraceConfig>) -> Self {
        Self {
            inner: pool,
            params: TraceParams::new(config),
        }
    }

    /// Attaches tags to every span produced by this pool and its transactions
    ///
    /// These override static configuration tags and are themselves overridden
    /// by tags attached to the caller's context.
    #[must_use]
    pub fn with_meta(mut self, meta: HashMap<String, String>) -> Self {
        self.params.meta = Some(Arc::new(meta));
        self
    }

    /// Adds metrics collection to this instrumented pool
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let meter = meter_provider.meter("postgres");
    /// let pool = TracedPool::new(pool, TraceConfig::default()).with_metrics(&meter);
    /// ```
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, meter: &Meter) -> Self {
        self.params.metrics = Some(Arc::new(PgMetrics::new(meter)));
        self
    }

    #[must_use]
    pub fn config(&self) -> &TraceConfig {
        &self.params.config
    }

    /// Acquires a connection and starts a transaction with `options`
    ///
    /// A `Begin` span is emitted once the pool returns, whether or not it
    /// succeeded.
    ///
    /// # Errors
    ///
    /// Returns the pool's error unchanged if the transaction cannot be started
    pub async fn begin_tx(
        &self,
        cx: &Context,
        options: P::TxOptions,
    ) -> Result<TracedTx<P::Tx>, P::Error> {
        debug!("beginning transaction");

        let start = SystemTime::now();
        let result = run_task(OperationKind::Begin, self.inner.begin_tx(options)).await;
        self.params.try_trace(
            cx,
            OperationKind::Begin,
            "",
            start,
            error_of(&result),
            Vec::new(),
        );

        match result {
            Ok(tx) => {
                self.params.record_transaction_start();
                Ok(TracedTx::new(tx, self.params.clone()))
            }
            Err(e) => {
                error!(error = %e, "failed to begin transaction");
                Err(e)
            }
        }
    }

    /// Starts a transaction with the pool's default options
    ///
    /// # Errors
    ///
    /// Returns the pool's error unchanged if the transaction cannot be started
    pub async fn begin(&self, cx: &Context) -> Result<TracedTx<P::Tx>, P::Error>
    where
        P::TxOptions: Default,
    {
        self.begin_tx(cx, Default::default()).await
    }
}

impl<P> TracedPool<P> {
    /// Get a reference to the wrapped pool
    #[must_use]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Consume self and return the wrapped pool
    #[must_use]
    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P> Deref for TracedPool<P> {
    type Target = P;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<P> AsRef<P> for TracedPool<P> {
    fn as_ref(&self) -> &P {
        &self.inner
    }
}
