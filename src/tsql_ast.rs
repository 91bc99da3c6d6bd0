//! Query Abstract Syntax Tree (AST)
//!
//! Represents the parsed structure of a query before names are resolved
//! against a schema.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `select <projection> [from <tables>] (where <condition>)*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub projection: Projection,
    pub from: Vec<TableRef>,
    /// One entry per `where` clause, in order
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// `*`: every field of the `from` tables
    All,
    Fields(Vec<FieldRef>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    pub position: usize,
}

/// `field` or `table.field`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub table: Option<String>,
    pub field: String,
    pub position: usize,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.field),
            None => f.write_str(&self.field),
        }
    }
}

/// Boolean conditions for WHERE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Compare {
        field: FieldRef,
        op: CompareOp,
        value: Literal,
        /// Offset of the literal
        position: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Match,
    NotMatch,
    Equal,
    NotEqual,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
}

impl CompareOp {
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            CompareOp::LessThan
                | CompareOp::LessThanEq
                | CompareOp::GreaterThan
                | CompareOp::GreaterThanEq
        )
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Match => "~",
            CompareOp::NotMatch => "!~",
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "!=",
            CompareOp::LessThan => "<",
            CompareOp::LessThanEq => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterThanEq => ">=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    String(String),
    Date(String),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Date(d) => f.write_str(d),
            Literal::Null => f.write_str("null"),
        }
    }
}
