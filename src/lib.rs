//! Test Suite Database - Rust Core Engine
//!
//! Storage and query core for profile databases of the `[incr tsdb()]`
//! kind: a directory of flat, `@`-delimited tables described by a
//! `relations` schema file, joined on shared key fields and queried with a
//! small `select ... from ... where ...` language.
//!
//! # Architecture
//!
//! - Schema Layer: relations file parsing, datatypes, per-field defaults
//! - Storage Layer: escaped record lines, plain or gzip table files, atomic commit
//! - Database Layer: lazily loaded tables, join path search, inner/left joins
//! - Query Layer: lexer, parser, name resolution, lazy row iterator
//! - Processing Layer: buffered result sink for batch analysis runs

pub mod error;
pub mod types;
pub mod codec;
pub mod schema;
pub mod record;
pub mod table;
pub mod config;
pub mod database;
pub mod join;

// Query language modules
pub mod tsql_lexer;
pub mod tsql_ast;
pub mod tsql_parser;
pub mod tsql_ir;
pub mod tsql_executor;

// Batch processing
pub mod processor;

pub use error::{Result, TsdbError};
pub use types::{cast, format, DataType, Value};
pub use codec::{escape, unescape};
pub use schema::{parse_schema, Field, Relation, Schema};
pub use record::Record;
pub use table::Table;
pub use config::{CompressionPolicy, DatabaseConfig};
pub use database::Database;
pub use join::{join, path, JoinHop, JoinMode};

// Query exports
pub use tsql_parser::Parser;
pub use tsql_ir::{Column, QueryPlan};
pub use tsql_executor::{execute, select, QueryRows};

// Processing exports
pub use processor::{ItemOutcome, ItemResult, ProcessError, ResultSink, SinkConfig, SinkStats};
