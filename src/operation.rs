//! The kinds of database operations that produce spans

use std::fmt;
use std::str::FromStr;

/// A traced database operation
///
/// The string form is used as the span resource for operations that carry no
/// SQL text, and as the `db.operation.name` attribute on every span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Query,
    Ping,
    Prepare,
    Exec,
    Begin,
    Close,
    Commit,
    Rollback,
    CopyFrom,
}

impl OperationKind {
    /// All operation kinds, in declaration order
    pub const ALL: [OperationKind; 10] = [
        OperationKind::Connect,
        OperationKind::Query,
        OperationKind::Ping,
        OperationKind::Prepare,
        OperationKind::Exec,
        OperationKind::Begin,
        OperationKind::Close,
        OperationKind::Commit,
        OperationKind::Rollback,
        OperationKind::CopyFrom,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Connect => "Connect",
            OperationKind::Query => "Query",
            OperationKind::Ping => "Ping",
            OperationKind::Prepare => "Prepare",
            OperationKind::Exec => "Exec",
            OperationKind::Begin => "Begin",
            OperationKind::Close => "Close",
            OperationKind::Commit => "Commit",
            OperationKind::Rollback => "Rollback",
            OperationKind::CopyFrom => "CopyFrom",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known operation kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

impl fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operation kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownOperation {}

impl FromStr for OperationKind {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(OperationKind::CopyFrom.as_str(), "CopyFrom");
        assert_eq!(OperationKind::Commit.to_string(), "Commit");
    }

    #[test]
    fn test_parse_operation_kind() {
        assert_eq!("exec".parse::<OperationKind>(), Ok(OperationKind::Exec));
        assert_eq!(" Rollback ".parse::<OperationKind>(), Ok(OperationKind::Rollback));
        assert_eq!("copyfrom".parse::<OperationKind>(), Ok(OperationKind::CopyFrom));
        assert!("vacuum".parse::<OperationKind>().is_err());
    }
}
