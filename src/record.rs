//! Records: positional raw field values for one relation
//!
//! A record keeps the unescaped text of each field and whether the field
//! is present at all. Typed access goes through the relation's datatypes.

use std::collections::HashMap;

use crate::codec;
use crate::error::{Result, TsdbError};
use crate::schema::Relation;
use crate::types::{self, DataType, Value, UNKNOWN_INTEGER};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    values: Vec<Option<String>>,
}

impl Record {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Record { values }
    }

    /// Build from decoded field text; empty text marks an absent field
    pub fn from_fields(relation: &Relation, fields: Vec<String>) -> Result<Self> {
        if fields.len() != relation.len() {
            return Err(TsdbError::record(format!(
                "expected {} fields for '{}', got {}",
                relation.len(),
                relation.name(),
                fields.len()
            )));
        }
        let values = fields
            .into_iter()
            .map(|f| if f.is_empty() { None } else { Some(f) })
            .collect();
        Ok(Record { values })
    }

    /// Decode one stored line
    pub fn from_line(relation: &Relation, line: &str) -> Result<Self> {
        Self::from_fields(relation, codec::decode_line(line))
    }

    /// Build from typed values in field order
    pub fn from_values(relation: &Relation, values: &[Value]) -> Result<Self> {
        if values.len() != relation.len() {
            return Err(TsdbError::record(format!(
                "expected {} values for '{}', got {}",
                relation.len(),
                relation.name(),
                values.len()
            )));
        }
        let values = relation
            .fields()
            .iter()
            .zip(values)
            .map(|(field, value)| raw_of(value, &field.datatype))
            .collect::<Result<Vec<_>>>()?;
        Ok(Record { values })
    }

    /// Build from a name to value mapping; unset fields take their default
    pub fn from_map(relation: &Relation, map: &HashMap<String, Value>) -> Result<Self> {
        for name in map.keys() {
            if relation.index_of(name).is_none() {
                return Err(TsdbError::record(format!(
                    "unknown field '{}' for '{}'",
                    name,
                    relation.name()
                )));
            }
        }
        let values = relation
            .fields()
            .iter()
            .map(|field| {
                let value = map.get(&field.name).unwrap_or(&field.default);
                raw_of(value, &field.datatype)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Record { values })
    }

    /// Record holding every field's default
    pub fn defaults(relation: &Relation) -> Result<Self> {
        Self::from_map(relation, &HashMap::new())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw text of field `i`; `None` when absent
    pub fn raw(&self, i: usize) -> Option<&str> {
        self.values.get(i).and_then(|v| v.as_deref())
    }

    pub fn raw_values(&self) -> &[Option<String>] {
        &self.values
    }

    /// Typed value of field `i`; an absent field yields the field default.
    /// An explicit empty string in a textual field reads back as `""`.
    pub fn get(&self, relation: &Relation, i: usize) -> Result<Value> {
        let field = relation.field(i).ok_or_else(|| {
            TsdbError::record(format!("field index {} out of range for '{}'", i, relation.name()))
        })?;
        match self.raw(i) {
            None => Ok(field.default.clone()),
            Some("") if !field.datatype.is_textual() => Ok(field.default.clone()),
            Some(raw) => types::cast(raw, &field.datatype),
        }
    }

    /// Typed value of the named field
    pub fn value(&self, relation: &Relation, name: &str) -> Result<Value> {
        let i = relation.index_of(name).ok_or_else(|| {
            TsdbError::record(format!("unknown field '{}' for '{}'", name, relation.name()))
        })?;
        self.get(relation, i)
    }

    /// Whether field `i` carries no information: unset, empty in a
    /// non-textual field, or the unknown integer
    pub fn is_absent(&self, relation: &Relation, i: usize) -> bool {
        let datatype = relation.field(i).map(|f| &f.datatype);
        match self.raw(i) {
            None => true,
            Some("") => datatype.map_or(true, |d| !d.is_textual()),
            Some(raw) => {
                datatype == Some(&DataType::Integer) && raw.parse::<i64>() == Ok(UNKNOWN_INTEGER)
            }
        }
    }

    /// Replace the raw text of field `i`, producing a new record
    pub fn with_raw(&self, i: usize, raw: Option<String>) -> Self {
        let mut values = self.values.clone();
        if let Some(slot) = values.get_mut(i) {
            *slot = raw;
        }
        Record { values }
    }

    /// Fields of `self` followed by fields of `other`
    pub fn concat(&self, other: &Record) -> Self {
        let mut values = Vec::with_capacity(self.len() + other.len());
        values.extend(self.values.iter().cloned());
        values.extend(other.values.iter().cloned());
        Record { values }
    }

    /// Encode as a stored line without the trailing newline
    pub fn to_line(&self) -> String {
        codec::encode_line(
            &self
                .values
                .iter()
                .map(|v| v.as_deref().unwrap_or(""))
                .collect::<Vec<_>>(),
        )
    }
}

/// Null is absence; empty text stays an explicit value only for textual types
fn raw_of(value: &Value, datatype: &DataType) -> Result<Option<String>> {
    if *value == Value::Null {
        return Ok(None);
    }
    let raw = types::format(value, datatype)?;
    Ok(if raw.is_empty() && !datatype.is_textual() { None } else { Some(raw) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;

    fn item() -> Relation {
        parse_schema("item:\n  i-id :integer :key\n  i-input :string\n  i-wf :integer\n")
            .unwrap()
            .get("item")
            .unwrap()
            .clone()
    }

    #[test]
    fn test_from_line() {
        let rel = item();
        let rec = Record::from_line(&rel, "1@It rained.@1").unwrap();
        assert_eq!(rec.get(&rel, 0).unwrap(), Value::Integer(1));
        assert_eq!(rec.value(&rel, "i-input").unwrap(), Value::from("It rained."));

        let err = Record::from_line(&rel, "1@two fields").unwrap_err();
        assert_eq!(err.name(), "RecordError");
    }

    #[test]
    fn test_from_map_fills_defaults() {
        let rel = item();
        let mut map = HashMap::new();
        map.insert("i-input".to_string(), Value::from("Dogs bark."));
        let rec = Record::from_map(&rel, &map).unwrap();

        assert_eq!(rec.raw(0), Some("-1"));
        assert_eq!(rec.raw(2), Some("1"));
        assert!(rec.is_absent(&rel, 0));
        assert!(!rec.is_absent(&rel, 1));
        assert!(!rec.is_absent(&rel, 2));

        map.insert("bogus".to_string(), Value::Null);
        assert!(Record::from_map(&rel, &map).is_err());
    }

    #[test]
    fn test_absent_string_field() {
        let rel = item();
        let rec = Record::from_line(&rel, "3@@").unwrap();
        assert_eq!(rec.raw(1), None);
        assert!(rec.is_absent(&rel, 1));
        assert_eq!(rec.get(&rel, 1).unwrap(), Value::Null);
        assert_eq!(rec.get(&rel, 2).unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_explicit_empty_string_is_not_absent() {
        let rel = item();
        let rec = Record::from_values(&rel, &[Value::from(5), Value::from(""), Value::from(1)])
            .unwrap();
        assert_eq!(rec.raw(1), Some(""));
        assert!(!rec.is_absent(&rel, 1));
        assert_eq!(rec.get(&rel, 1).unwrap(), Value::from(""));

        // stored text cannot tell the two apart
        let reread = Record::from_line(&rel, &rec.to_line()).unwrap();
        assert_eq!(reread.raw(1), None);
        assert!(reread.is_absent(&rel, 1));

        let cleared = rec.with_raw(1, None);
        assert_eq!(cleared.get(&rel, 1).unwrap(), Value::Null);
    }

    #[test]
    fn test_to_line_escapes() {
        let rel = item();
        let rec = Record::from_values(
            &rel,
            &[Value::from(2), Value::from("a@b\\c"), Value::Null],
        )
        .unwrap();
        let line = rec.to_line();
        assert_eq!(line, "2@a\\sb\\\\c@");
        assert_eq!(Record::from_line(&rel, &line).unwrap(), rec);
    }

    #[test]
    fn test_with_raw_and_concat() {
        let rel = item();
        let rec = Record::from_line(&rel, "1@x@1").unwrap();
        let edited = rec.with_raw(1, Some("y".to_string()));
        assert_eq!(edited.raw(1), Some("y"));
        assert_eq!(rec.raw(1), Some("x"));

        let joined = rec.concat(&edited);
        assert_eq!(joined.len(), 6);
        assert_eq!(joined.raw(4), Some("y"));
    }
}
