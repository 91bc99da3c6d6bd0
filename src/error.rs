//! Error types for test suite databases
//!
//! Every failure surfaced by the crate is a [`TsdbError`]. Each variant maps
//! to a short, stable name (see [`TsdbError::name`]) so front-ends can report
//! and dispatch on the kind without matching on message text.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::DataType;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TsdbError>;

#[derive(Debug, Error)]
pub enum TsdbError {
    /// Malformed schema description
    #[error("line {line}: {message}")]
    Schema { line: usize, message: String },

    /// Raw text does not match the lexical form of its datatype
    #[error("cannot cast {value:?} to {datatype}")]
    Cast { datatype: DataType, value: String },

    /// Unreadable or unwritable table or schema file
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Table file whose content cannot be decoded
    #[error("{}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    /// Record constructed with the wrong shape for its relation
    #[error("{message}")]
    Record { message: String },

    /// No chain of shared keys connects two tables
    #[error("no shared key path from {from} to {to}")]
    Join { from: String, to: String },

    /// Malformed query string
    #[error("at position {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    /// Ambiguous or unknown table or field reference
    #[error("{message}")]
    QueryResolution { message: String },
}

impl TsdbError {
    pub fn schema(line: usize, message: impl Into<String>) -> Self {
        TsdbError::Schema {
            line,
            message: message.into(),
        }
    }

    pub fn cast(datatype: DataType, value: impl Into<String>) -> Self {
        TsdbError::Cast {
            datatype,
            value: value.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TsdbError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        TsdbError::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn record(message: impl Into<String>) -> Self {
        TsdbError::Record {
            message: message.into(),
        }
    }

    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        TsdbError::QuerySyntax {
            position,
            message: message.into(),
        }
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        TsdbError::QueryResolution {
            message: message.into(),
        }
    }

    /// Machine-stable name of the error kind
    pub fn name(&self) -> &'static str {
        match self {
            TsdbError::Schema { .. } => "SchemaError",
            TsdbError::Cast { .. } => "CastError",
            TsdbError::Io { .. } | TsdbError::Corrupt { .. } => "IOError",
            TsdbError::Record { .. } => "RecordError",
            TsdbError::Join { .. } => "JoinError",
            TsdbError::QuerySyntax { .. } => "QuerySyntaxError",
            TsdbError::QueryResolution { .. } => "QueryResolutionError",
        }
    }

    /// Process exit status used by the command-line front-end
    pub fn exit_code(&self) -> u8 {
        match self {
            TsdbError::Schema { .. } => 2,
            TsdbError::QuerySyntax { .. } | TsdbError::QueryResolution { .. } => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_are_stable() {
        assert_eq!(TsdbError::schema(3, "x").name(), "SchemaError");
        assert_eq!(TsdbError::cast(DataType::Integer, "abc").name(), "CastError");
        assert_eq!(
            TsdbError::io("item", io::Error::from(io::ErrorKind::NotFound)).name(),
            "IOError"
        );
        assert_eq!(TsdbError::corrupt("item.gz", "bad gzip").name(), "IOError");
        assert_eq!(TsdbError::syntax(4, "x").name(), "QuerySyntaxError");
        assert_eq!(TsdbError::resolution("x").name(), "QueryResolutionError");
    }

    #[test]
    fn test_messages() {
        let err = TsdbError::syntax(7, "unexpected token");
        assert_eq!(err.to_string(), "at position 7: unexpected token");

        let err = TsdbError::Join {
            from: "item".to_string(),
            to: "fold".to_string(),
        };
        assert_eq!(err.to_string(), "no shared key path from item to fold");
    }

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        assert_eq!(TsdbError::schema(1, "x").exit_code(), 2);
        assert_eq!(TsdbError::syntax(0, "x").exit_code(), 3);
        assert_eq!(TsdbError::resolution("x").exit_code(), 3);
        assert_eq!(TsdbError::cast(DataType::Date, "x").exit_code(), 1);
    }
}
