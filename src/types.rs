//! Core type definitions: field datatypes and typed values
//!
//! Raw field text is converted to [`Value`]s with [`cast`] and back with
//! [`format`]. The two are inverses for every representable value.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, TsdbError};

/// Unknown value for integer fields
pub const UNKNOWN_INTEGER: i64 = -1;

/// Field datatypes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    String,
    Date,
    /// Untyped column (`:other`); cast and formatted as plain text
    Other,
}

impl DataType {
    /// Parse a schema datatype token (`:integer`, `:string`, `:date`, `:other`)
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            ":integer" => Some(DataType::Integer),
            ":string" => Some(DataType::String),
            ":date" => Some(DataType::Date),
            ":other" => Some(DataType::Other),
            _ => None,
        }
    }

    /// Schema token for this datatype
    pub fn token(&self) -> &'static str {
        match self {
            DataType::Integer => ":integer",
            DataType::String => ":string",
            DataType::Date => ":date",
            DataType::Other => ":other",
        }
    }

    /// Value an absent field of this type reads as
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Integer => Value::Integer(UNKNOWN_INTEGER),
            _ => Value::Null,
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, DataType::String | DataType::Other)
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Date)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "integer",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::Other => "other",
        };
        f.write_str(name)
    }
}

/// Typed field values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    String(String),
    Date(NaiveDateTime),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Order two values of the same kind; `None` across kinds or for nulls
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => f.write_str(&format_date(d)),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

/// Convert unescaped field text to a typed value.
///
/// Text is taken unchanged for textual types, so empty text is the empty
/// string. For integers and dates empty text yields the datatype's default.
pub fn cast(raw: &str, datatype: &DataType) -> Result<Value> {
    if raw.is_empty() && !datatype.is_textual() {
        return Ok(datatype.default_value());
    }
    match datatype {
        DataType::Integer => raw
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| TsdbError::cast(datatype.clone(), raw)),
        DataType::Date => parse_date(raw)
            .map(Value::Date)
            .ok_or_else(|| TsdbError::cast(datatype.clone(), raw)),
        DataType::String | DataType::Other => Ok(Value::String(raw.to_string())),
    }
}

/// Convert a typed value to unescaped field text; the inverse of [`cast`].
pub fn format(value: &Value, datatype: &DataType) -> Result<String> {
    match (value, datatype) {
        (Value::Null, _) => Ok(String::new()),
        (Value::Integer(n), DataType::Integer) => Ok(n.to_string()),
        (Value::Integer(n), DataType::String | DataType::Other) => Ok(n.to_string()),
        (Value::Date(d), DataType::Date) => Ok(format_date(d)),
        (Value::String(s), DataType::String | DataType::Other) => Ok(s.clone()),
        // text destined for a typed column must already be in lexical form
        (Value::String(s), DataType::Integer | DataType::Date) => {
            cast(s, datatype)?;
            Ok(s.clone())
        }
        (other, _) => Err(TsdbError::cast(datatype.clone(), other.to_string())),
    }
}

/// Parse the date conventions found in test suite profiles.
///
/// Accepted forms: `2019-03-21`, `21-mar-2019`, each optionally followed
/// by a time `14:22`, `14:22:05`, or a parenthesized `(14:22)`.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    let (date_part, time_part) = match raw.split_once(char::is_whitespace) {
        Some((d, t)) => (d, t.trim()),
        None => (raw, ""),
    };

    let date = if date_part.chars().any(|c| c.is_ascii_alphabetic()) {
        NaiveDate::parse_from_str(date_part, "%d-%b-%Y").ok()?
    } else {
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?
    };

    let time_part = time_part
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(time_part)
        .trim();

    let time = if time_part.is_empty() {
        NaiveTime::MIN
    } else {
        NaiveTime::parse_from_str(time_part, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(time_part, "%H:%M"))
            .ok()?
    };

    Some(date.and_time(time))
}

/// Render a date in ISO form, omitting zero time components
pub fn format_date(d: &NaiveDateTime) -> String {
    if d.hour() == 0 && d.minute() == 0 && d.second() == 0 {
        d.format("%Y-%m-%d").to_string()
    } else if d.second() == 0 {
        d.format("%Y-%m-%d %H:%M").to_string()
    } else {
        d.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
