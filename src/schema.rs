//! Schema System for test suite databases
//!
//! A database directory carries one schema description (the `relations`
//! file) naming every table and its fields in positional order:
//!
//! ```text
//! item:
//!   i-id :integer :key       # unique item identifier
//!   i-input :string          # input sentence
//! parse:
//!   parse-id :integer :key
//!   i-id :integer :key
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, TsdbError};
use crate::types::{DataType, Value};

/// Field defaults that differ from their datatype's default
const FIELD_DEFAULTS: &[(&str, i64)] = &[("i-wf", 1)];

/// Field definition within a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Relation the field was declared in
    pub table: String,
    pub datatype: DataType,
    pub is_key: bool,
    pub partial: bool,
    pub default: Value,
    pub comment: Option<String>,
}

impl Field {
    pub fn new(table: &str, name: &str, datatype: DataType) -> Self {
        let default = default_for(name, &datatype);
        Field {
            name: name.to_string(),
            table: table.to_string(),
            datatype,
            is_key: false,
            partial: false,
            default,
            comment: None,
        }
    }

    pub fn with_key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn with_partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// `table.field`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }
}

fn default_for(name: &str, datatype: &DataType) -> Value {
    if *datatype == DataType::Integer {
        if let Some((_, n)) = FIELD_DEFAULTS.iter().find(|(f, _)| *f == name) {
            return Value::Integer(*n);
        }
    }
    datatype.default_value()
}

/// Ordered field list describing one table.
///
/// Records are positional, so field order is significant. Lookups go
/// through a name index built once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    name: String,
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl Relation {
    pub fn new(name: &str, fields: Vec<Field>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.qualified_name(), i).is_some() {
                return Err(TsdbError::record(format!(
                    "duplicate field '{}' in relation '{}'",
                    field.qualified_name(),
                    name
                )));
            }
            index.entry(field.name.clone()).or_insert(i);
        }

        Ok(Relation {
            name: name.to_string(),
            fields,
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field given as `field` or `table.field`.
    ///
    /// An unqualified name resolves to its first occurrence.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    /// Every position holding `field`, optionally restricted to one source table
    pub fn positions(&self, table: Option<&str>, field: &str) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name == field && table.map_or(true, |t| f.table == t))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_key)
    }

    pub fn is_key(&self, field: &str) -> bool {
        self.get_field(field).map_or(false, |f| f.is_key)
    }

    /// Names of the tables contributing fields, in order of first appearance
    pub fn source_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for field in &self.fields {
            if !tables.contains(&field.table.as_str()) {
                tables.push(&field.table);
            }
        }
        tables
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for field in &self.fields {
            write!(f, "  {} {}", field.name, field.datatype.token())?;
            if field.is_key {
                write!(f, " :key")?;
            }
            if field.partial {
                write!(f, " :partial")?;
            }
            if let Some(comment) = &field.comment {
                write!(f, "\t# {}", comment)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// All relations of one database, in declaration order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    relations: Vec<Relation>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(relations: Vec<Relation>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (i, relation) in relations.iter().enumerate() {
            if by_name.insert(relation.name().to_string(), i).is_some() {
                return Err(TsdbError::schema(
                    0,
                    format!("duplicate table '{}'", relation.name()),
                ));
            }
        }
        Ok(Schema { relations, by_name })
    }

    pub fn get(&self, table: &str) -> Option<&Relation> {
        self.by_name.get(table).map(|&i| &self.relations[i])
    }

    pub fn contains(&self, table: &str) -> bool {
        self.by_name.contains_key(table)
    }

    pub fn tables(&self) -> &[Relation] {
        &self.relations
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(|r| r.name())
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Tables declaring `field`, in declaration order
    pub fn tables_with_field(&self, field: &str) -> Vec<&str> {
        self.relations
            .iter()
            .filter(|r| r.get_field(field).is_some())
            .map(|r| r.name())
            .collect()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, relation) in self.relations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", relation)?;
        }
        Ok(())
    }
}

/// Parse a schema description.
///
/// A line consisting of a single `name:` token opens a table; every other
/// non-blank line declares a field of the most recently opened table.
/// Indentation is conventional but not required.
pub fn parse_schema(text: &str) -> Result<Schema> {
    let mut relations: Vec<Relation> = Vec::new();
    let mut current: Option<(String, usize, Vec<Field>)> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let (content, comment) = match raw_line.split_once('#') {
            Some((c, rest)) => (c.trim(), Some(rest.trim())),
            None => (raw_line.trim(), None),
        };
        if content.is_empty() {
            continue;
        }

        if let Some(name) = table_header(content) {
            if let Some(block) = current.take() {
                relations.push(close_block(block)?);
            }
            if relations.iter().any(|r| r.name() == name) {
                return Err(TsdbError::schema(lineno, format!("duplicate table '{}'", name)));
            }
            current = Some((name.to_string(), lineno, Vec::new()));
            continue;
        }

        let (table, _, fields) = current.as_mut().ok_or_else(|| {
            TsdbError::schema(lineno, format!("field declared outside a table: {}", content))
        })?;
        let field = parse_field(table, content, comment, lineno)?;
        if fields.iter().any(|f| f.name == field.name) {
            return Err(TsdbError::schema(
                lineno,
                format!("duplicate field '{}' in table '{}'", field.name, table),
            ));
        }
        fields.push(field);
    }

    if let Some(block) = current.take() {
        relations.push(close_block(block)?);
    }

    Schema::new(relations)
}

fn table_header(content: &str) -> Option<&str> {
    let name = content.strip_suffix(':')?;
    if name.is_empty() || name.contains(char::is_whitespace) || name.contains(':') {
        return None;
    }
    Some(name)
}

fn close_block((name, lineno, fields): (String, usize, Vec<Field>)) -> Result<Relation> {
    if fields.is_empty() {
        return Err(TsdbError::schema(
            lineno,
            format!("unterminated table '{}': no fields declared", name),
        ));
    }
    Relation::new(&name, fields).map_err(|e| TsdbError::schema(lineno, e.to_string()))
}

fn parse_field(table: &str, content: &str, comment: Option<&str>, lineno: usize) -> Result<Field> {
    let mut tokens = content.split_whitespace();
    let name = match tokens.next() {
        Some(n) if !n.starts_with(':') => n,
        _ => return Err(TsdbError::schema(lineno, format!("missing field name: {}", content))),
    };

    let mut datatype = None;
    let mut is_key = false;
    let mut partial = false;
    for token in tokens {
        match token {
            ":key" => is_key = true,
            ":partial" => partial = true,
            _ => match DataType::from_token(token) {
                Some(dt) if datatype.is_none() => datatype = Some(dt),
                Some(_) => {
                    return Err(TsdbError::schema(
                        lineno,
                        format!("field '{}' declares more than one datatype", name),
                    ))
                }
                None => {
                    return Err(TsdbError::schema(
                        lineno,
                        format!("unknown datatype '{}' for field '{}'", token, name),
                    ))
                }
            },
        }
    }

    let datatype = datatype.ok_or_else(|| {
        TsdbError::schema(lineno, format!("field '{}' has no datatype", name))
    })?;

    let mut field = Field::new(table, name, datatype);
    field.is_key = is_key;
    field.partial = partial;
    field.comment = comment.filter(|c| !c.is_empty()).map(str::to_string);
    Ok(field)
}
