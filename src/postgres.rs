//! Instrumented pools backed by `deadpool-postgres`
//!
//! [`connect`] and [`connect_with_config`] build a traced pool from a
//! connection string or a parsed [`PgConfig`]. The pool connects lazily: no
//! connection is opened until the first transaction begins.
//!
//! The constructors use plain TCP. For TLS, build a `deadpool_postgres::Pool`
//! with the connector of your choice and wrap it with [`PgPool::from`].
//!
//! # Example
//!
//! ```rust,no_run
//! use opentelemetry::Context;
//! use otel_instrumentation_pgpool::postgres;
//! use otel_instrumentation_pgpool::{PropagationMode, TraceConfigBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = postgres::connect(
//!     "host=localhost user=postgres dbname=orders",
//!     TraceConfigBuilder::new()
//!         .with_propagation_mode(PropagationMode::Full)
//!         .build(),
//! )?;
//!
//! let cx = Context::current();
//! let mut tx = pool.begin(&cx).await?;
//! tx.exec(&cx, "UPDATE orders SET paid = true WHERE id = $1", &[&42_i64]).await?;
//! tx.commit(&cx).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::TraceConfig;
use crate::driver::{Identifier, Pool, Transaction};
use crate::pool::TracedPool;
use deadpool_postgres::{
    BuildError, ClientWrapper, Manager, Object, PoolConfig, PoolError, Runtime,
};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::error::DbError;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row, Statement};

/// One row of values for [`PgTransaction::copy_from`]
///
/// Each value's Rust type must match the binary format of its column.
pub type CopyRow = Vec<Box<dyn ToSql + Send + Sync>>;

/// Errors from the PostgreSQL adapter
#[derive(Debug)]
pub enum PgError {
    /// Error returned by the server or the connection
    Db(tokio_postgres::Error),
    /// No connection could be taken from the pool
    Pool(PoolError),
    /// The pool could not be built
    Build(BuildError),
    /// A copy row did not have one value per column
    RowLength { expected: usize, found: usize },
    /// The transaction was already committed or rolled back
    Finished,
}

impl PgError {
    /// The server-side error, when the server rejected the request
    #[must_use]
    pub fn as_db_error(&self) -> Option<&DbError> {
        match self {
            Self::Db(e) | Self::Pool(PoolError::Backend(e)) => e.as_db_error(),
            _ => None,
        }
    }
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Db(e) => write!(f, "{e}"),
            Self::Pool(e) => write!(f, "failed to get a connection: {e}"),
            Self::Build(e) => write!(f, "failed to build pool: {e}"),
            Self::RowLength { expected, found } => {
                write!(f, "copy row has {found} values, expected {expected}")
            }
            Self::Finished => write!(f, "transaction already finished"),
        }
    }
}

impl std::error::Error for PgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Db(e) => Some(e),
            Self::Pool(e) => Some(e),
            Self::Build(e) => Some(e),
            Self::RowLength { .. } | Self::Finished => None,
        }
    }
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Db(e)
    }
}

impl From<PoolError> for PgError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

impl From<BuildError> for PgError {
    fn from(e: BuildError) -> Self {
        Self::Build(e)
    }
}

/// Connection and pool settings for [`connect_with_config`]
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub connection: tokio_postgres::Config,
    pub pool: PoolConfig,
}

/// Parses a `key=value` or `postgres://` connection string
///
/// Pool sizing and timeouts take their defaults; adjust
/// [`PgConfig::pool`] before passing the result to [`connect_with_config`].
///
/// # Errors
///
/// Returns [`PgError::Db`] if the connection string is malformed.
pub fn parse_config(conn: &str) -> Result<PgConfig, PgError> {
    Ok(PgConfig {
        connection: tokio_postgres::Config::from_str(conn)?,
        pool: PoolConfig::default(),
    })
}

/// Creates a traced pool from a connection string
///
/// # Errors
///
/// Returns an error if the connection string is malformed or the pool
/// cannot be built.
pub fn connect(conn: &str, config: TraceConfig) -> Result<TracedPool<PgPool>, PgError> {
    connect_with_config(parse_config(conn)?, config)
}

/// Creates a traced pool from parsed settings
///
/// # Errors
///
/// Returns [`PgError::Build`] if the pool cannot be built.
pub fn connect_with_config(
    pg_config: PgConfig,
    config: TraceConfig,
) -> Result<TracedPool<PgPool>, PgError> {
    let max_size = pg_config.pool.max_size;
    let manager = Manager::new(pg_config.connection, NoTls);
    let pool = deadpool_postgres::Pool::builder(manager)
        .config(pg_config.pool)
        .runtime(Runtime::Tokio1)
        .build()?;

    tracing::debug!(max_size, "created postgres pool");

    Ok(TracedPool::new(PgPool::from(pool), config))
}

/// A `deadpool-postgres` pool implementing [`Pool`]
#[derive(Clone, Debug)]
pub struct PgPool {
    inner: deadpool_postgres::Pool,
}

impl From<deadpool_postgres::Pool> for PgPool {
    fn from(inner: deadpool_postgres::Pool) -> Self {
        Self { inner }
    }
}

impl Deref for PgPool {
    type Target = deadpool_postgres::Pool;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// Transaction mode; unset fields use the server's defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation_level: Option<IsolationLevel>,
    pub access_mode: Option<AccessMode>,
    pub deferrable: Option<bool>,
}

impl TxOptions {
    fn begin_statement(&self) -> String {
        let mut modes = Vec::with_capacity(3);
        if let Some(level) = self.isolation_level {
            modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        match self.access_mode {
            Some(AccessMode::ReadWrite) => modes.push("READ WRITE".to_string()),
            Some(AccessMode::ReadOnly) => modes.push("READ ONLY".to_string()),
            None => {}
        }
        match self.deferrable {
            Some(true) => modes.push("DEFERRABLE".to_string()),
            Some(false) => modes.push("NOT DEFERRABLE".to_string()),
            None => {}
        }

        if modes.is_empty() {
            "BEGIN".to_string()
        } else {
            format!("BEGIN {}", modes.join(", "))
        }
    }
}

impl Pool for PgPool {
    type Tx = PgTransaction;
    type TxOptions = TxOptions;
    type Error = PgError;

    async fn begin_tx(&self, options: TxOptions) -> Result<PgTransaction, PgError> {
        let client = self.inner.get().await?;
        client.batch_execute(&options.begin_statement()).await?;
        Ok(PgTransaction {
            client: Some(client),
        })
    }
}

/// A transaction holding one pooled connection
///
/// The connection goes back to the pool after a successful commit or
/// rollback. If the handle is dropped while the transaction is still open,
/// or finishing it fails, the connection is detached from the pool and
/// closed, and the server aborts whatever it had in progress.
pub struct PgTransaction {
    client: Option<Object>,
}

impl PgTransaction {
    fn client(&self) -> Result<&ClientWrapper, PgError> {
        self.client.as_deref().ok_or(PgError::Finished)
    }

    async fn finish(mut self, statement: &str) -> Result<(), PgError> {
        let client = self.client.take().ok_or(PgError::Finished)?;
        let result = client.batch_execute(statement).await;
        if result.is_err() {
            drop(Object::take(client));
        }
        Ok(result?)
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::debug!("closing connection of unfinished transaction");
            drop(Object::take(client));
        }
    }
}

impl Transaction for PgTransaction {
    type Error = PgError;
    type Param = dyn ToSql + Sync;
    type Statement = Statement;
    type CommandTag = u64;
    type Rows = Vec<Row>;
    type Row = Result<Row, PgError>;
    type CopySource = Vec<CopyRow>;

    // statements are named by the client, not the caller
    async fn prepare(&mut self, _name: &str, sql: &str) -> Result<Statement, PgError> {
        Ok(self.client()?.prepare(sql).await?)
    }

    async fn exec(&mut self, sql: &str, params: &[&Self::Param]) -> Result<u64, PgError> {
        Ok(self.client()?.execute(sql, params).await?)
    }

    async fn query(&mut self, sql: &str, params: &[&Self::Param]) -> Result<Vec<Row>, PgError> {
        Ok(self.client()?.query(sql, params).await?)
    }

    async fn query_row(&mut self, sql: &str, params: &[&Self::Param]) -> Result<Row, PgError> {
        Ok(self.client()?.query_one(sql, params).await?)
    }

    async fn copy_from(
        &mut self,
        table: &Identifier,
        columns: &[&str],
        source: Vec<CopyRow>,
    ) -> Result<u64, PgError> {
        let client = self.client()?;
        let (select, copy) = copy_statements(table, columns);

        let types: Vec<Type> = client
            .prepare(&select)
            .await?
            .columns()
            .iter()
            .map(|column| column.type_().clone())
            .collect();

        let sink = client.copy_in(copy.as_str()).await?;
        let mut writer = std::pin::pin!(BinaryCopyInWriter::new(sink, &types));
        for row in &source {
            if row.len() != types.len() {
                return Err(PgError::RowLength {
                    expected: types.len(),
                    found: row.len(),
                });
            }
            let values: Vec<&(dyn ToSql + Sync)> = row
                .iter()
                .map(|value| &**value as &(dyn ToSql + Sync))
                .collect();
            writer.as_mut().write(&values).await?;
        }

        Ok(writer.finish().await?)
    }

    async fn commit(self) -> Result<(), PgError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self) -> Result<(), PgError> {
        self.finish("ROLLBACK").await
    }
}

/// The statement used to learn the column types, and the `COPY` statement itself
fn copy_statements(table: &Identifier, columns: &[&str]) -> (String, String) {
    if columns.is_empty() {
        return (
            format!("SELECT * FROM {table}"),
            format!("COPY {table} FROM STDIN BINARY"),
        );
    }

    let columns = columns
        .iter()
        .map(|column| Identifier::from(*column).sanitize())
        .collect::<Vec<_>>()
        .join(", ");
    (
        format!("SELECT {columns} FROM {table}"),
        format!("COPY {table} ({columns}) FROM STDIN BINARY"),
    )
}
