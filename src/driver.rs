//! The surface of the wrapped PostgreSQL client
//!
//! The facades in this crate are generic over these traits so that any pool
//! implementation can be instrumented. Implementations forward directly to
//! their client; they never see rewritten SQL from anything but the facade.

use std::error::Error;
use std::fmt;
use std::future::Future;

/// A connection pool that can open transactions
pub trait Pool: Send + Sync {
    /// The transaction handle returned by [`begin_tx`](Self::begin_tx)
    type Tx: Transaction<Error = Self::Error>;
    /// Transaction mode (isolation level, access mode, deferrable)
    type TxOptions: Send;
    type Error: Error + Send + Sync + 'static;

    /// Acquires a connection and starts a transaction on it
    fn begin_tx(
        &self,
        options: Self::TxOptions,
    ) -> impl Future<Output = Result<Self::Tx, Self::Error>> + Send;
}

/// An open transaction
///
/// The handle is consumed by [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). Dropping it without calling either leaves the
/// transaction to the client's own cleanup.
pub trait Transaction: Send {
    type Error: Error + Send + Sync + 'static;
    /// Query parameter type, usually a trait object such as `dyn ToSql + Sync`
    type Param: ?Sized + Sync;
    type Statement: Send;
    type CommandTag: Send;
    type Rows: Send;
    /// A single row whose error, if any, surfaces when it is read
    type Row: Send;
    type CopySource: Send;

    fn prepare(
        &mut self,
        name: &str,
        sql: &str,
    ) -> impl Future<Output = Result<Self::Statement, Self::Error>> + Send;

    fn exec(
        &mut self,
        sql: &str,
        params: &[&Self::Param],
    ) -> impl Future<Output = Result<Self::CommandTag, Self::Error>> + Send;

    fn query(
        &mut self,
        sql: &str,
        params: &[&Self::Param],
    ) -> impl Future<Output = Result<Self::Rows, Self::Error>> + Send;

    fn query_row(
        &mut self,
        sql: &str,
        params: &[&Self::Param],
    ) -> impl Future<Output = Self::Row> + Send;

    /// Bulk-loads rows into `table`, returning the number of rows copied
    fn copy_from(
        &mut self,
        table: &Identifier,
        columns: &[&str],
        source: Self::CopySource,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A possibly schema-qualified SQL identifier such as `public.orders`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Vec<String>);

impl Identifier {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Quotes each part for safe inclusion in SQL text
    ///
    /// Parts are wrapped in double quotes with embedded quotes doubled and NUL
    /// bytes removed, then joined with `.`.
    #[must_use]
    pub fn sanitize(&self) -> String {
        self.0
            .iter()
            .map(|part| format!("\"{}\"", part.replace('"', "\"\"").replace('\0', "")))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sanitize())
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Self(vec![name.to_string()])
    }
}

impl<const N: usize> From<[&str; N]> for Identifier {
    fn from(parts: [&str; N]) -> Self {
        Self::new(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(Identifier::from("orders").sanitize(), "\"orders\"");
        assert_eq!(
            Identifier::from(["public", "orders"]).sanitize(),
            "\"public\".\"orders\""
        );
        assert_eq!(
            Identifier::from("we\"ird\0name").sanitize(),
            "\"we\"\"irdname\""
        );
    }
}
