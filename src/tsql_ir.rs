//! Query Intermediate Representation (IR)
//!
//! A [`QueryPlan`] is a parsed query with every name resolved against a
//! schema: the join chain to build, the columns it reads, and a filter whose
//! literals are already cast to the datatype of the field they are compared
//! with. Anything that can be checked without table data is checked here.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::error::{Result, TsdbError};
use crate::join::{self, JoinHop};
use crate::schema::Schema;
use crate::tsql_ast::*;
use crate::tsql_parser::Parser;
use crate::types::{self, DataType, Value};

/// A field of a specific table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub table: String,
    pub field: String,
    pub datatype: DataType,
}

impl Column {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.field)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.field)
    }
}

/// Value comparisons; regex and absence checks have their own filter nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
}

impl Comparison {
    /// Whether `field <op> literal` holds given how the field orders
    /// against the literal
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Equal => ordering == Ordering::Equal,
            Comparison::NotEqual => ordering != Ordering::Equal,
            Comparison::LessThan => ordering == Ordering::Less,
            Comparison::LessThanEq => ordering != Ordering::Greater,
            Comparison::GreaterThan => ordering == Ordering::Greater,
            Comparison::GreaterThanEq => ordering != Ordering::Less,
        }
    }

    fn from_op(op: CompareOp) -> Option<Self> {
        match op {
            CompareOp::Equal => Some(Comparison::Equal),
            CompareOp::NotEqual => Some(Comparison::NotEqual),
            CompareOp::LessThan => Some(Comparison::LessThan),
            CompareOp::LessThanEq => Some(Comparison::LessThanEq),
            CompareOp::GreaterThan => Some(Comparison::GreaterThan),
            CompareOp::GreaterThanEq => Some(Comparison::GreaterThanEq),
            CompareOp::Match | CompareOp::NotMatch => None,
        }
    }
}

/// Filter expression; `column` indexes [`QueryPlan::columns`]
#[derive(Debug, Clone)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Compare {
        column: usize,
        op: Comparison,
        value: Value,
    },
    Regex {
        column: usize,
        pattern: Regex,
        negated: bool,
    },
    /// `field = null` (or `!= null` when negated)
    Absent { column: usize, negated: bool },
}

/// Query execution plan
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Table the join chain starts from
    pub base: String,
    /// Hops joining every other table the query touches, in order
    pub joins: Vec<JoinHop>,
    /// Every column read by the projection or the filter
    pub columns: Vec<Column>,
    /// Projected columns, as indexes into `columns`
    pub projection: Vec<usize>,
    pub filter: Option<FilterExpr>,
}

impl QueryPlan {
    /// Parse and resolve a query string
    pub fn parse(query: &str, schema: &Schema) -> Result<Self> {
        let ast = Parser::parse(query)?;
        Self::from_ast(&ast, schema)
    }

    /// Resolve a parsed query against `schema`
    pub fn from_ast(query: &SelectQuery, schema: &Schema) -> Result<Self> {
        let mut planner = Planner::new(schema);

        for table in &query.from {
            planner.use_table(&table.name)?;
        }

        let mut refs: Vec<&FieldRef> = Vec::new();
        if let Projection::Fields(fields) = &query.projection {
            refs.extend(fields);
        }
        for condition in &query.conditions {
            collect_refs(condition, &mut refs);
        }
        planner.resolve(&refs)?;

        let projection = match &query.projection {
            Projection::All => {
                let mut projection = Vec::new();
                for table in &query.from {
                    let relation = schema
                        .get(&table.name)
                        .ok_or_else(|| unknown_table(&table.name))?;
                    for field in relation.fields() {
                        projection.push(planner.column(&field.table, &field.name)?);
                    }
                }
                projection
            }
            Projection::Fields(fields) => fields
                .iter()
                .map(|f| planner.column_for(f))
                .collect::<Result<Vec<_>>>()?,
        };

        let mut filter: Option<FilterExpr> = None;
        for condition in &query.conditions {
            let lowered = planner.lower(condition)?;
            filter = Some(match filter {
                Some(previous) => FilterExpr::And(Box::new(previous), Box::new(lowered)),
                None => lowered,
            });
        }

        let (base, joins) = planner.join_chain()?;
        debug!(
            base = %base,
            joins = joins.len(),
            columns = planner.columns.len(),
            "planned query"
        );

        Ok(QueryPlan {
            base,
            joins,
            columns: planner.columns,
            projection,
            filter,
        })
    }

    /// Every table the plan reads, base first
    pub fn tables(&self) -> Vec<&str> {
        let mut tables = vec![self.base.as_str()];
        tables.extend(self.joins.iter().map(|h| h.table.as_str()));
        tables
    }

    pub fn projected_columns(&self) -> impl Iterator<Item = &Column> {
        self.projection.iter().map(move |&i| &self.columns[i])
    }
}

fn collect_refs<'q>(condition: &'q Condition, out: &mut Vec<&'q FieldRef>) {
    match condition {
        Condition::And(l, r) | Condition::Or(l, r) => {
            collect_refs(l, out);
            collect_refs(r, out);
        }
        Condition::Not(inner) => collect_refs(inner, out),
        Condition::Compare { field, .. } => out.push(field),
    }
}

fn unknown_table(name: &str) -> TsdbError {
    TsdbError::resolution(format!("unknown table '{}'", name))
}

struct Planner<'s> {
    schema: &'s Schema,
    /// Tables the query touches, in the order they join
    context: Vec<String>,
    /// Table chosen for each unqualified field name
    resolved: HashMap<String, String>,
    columns: Vec<Column>,
}

impl<'s> Planner<'s> {
    fn new(schema: &'s Schema) -> Self {
        Planner {
            schema,
            context: Vec::new(),
            resolved: HashMap::new(),
            columns: Vec::new(),
        }
    }

    fn use_table(&mut self, name: &str) -> Result<()> {
        if !self.schema.contains(name) {
            return Err(unknown_table(name));
        }
        if !self.context.iter().any(|t| t == name) {
            self.context.push(name.to_string());
        }
        Ok(())
    }

    /// Pick a table for every field reference.
    ///
    /// Qualified references pull their table in. An unqualified name goes
    /// to the table already in the query that declares it, or to the only
    /// table in the schema that does. A name shared by several candidate
    /// tables is accepted only when it is a key in all of them, since the
    /// join makes those columns equal.
    fn resolve(&mut self, refs: &[&FieldRef]) -> Result<()> {
        let mut pending: Vec<&FieldRef> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for r in refs {
            match &r.table {
                Some(table) => {
                    let relation = self.schema.get(table).ok_or_else(|| unknown_table(table))?;
                    if relation.get_field(&r.field).is_none() {
                        return Err(TsdbError::resolution(format!(
                            "table '{}' has no field '{}'",
                            table, r.field
                        )));
                    }
                    self.use_table(table)?;
                }
                None => {
                    if seen.insert(r.field.as_str()) {
                        pending.push(r);
                    }
                }
            }
        }

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for r in pending {
                match self.try_resolve(r)? {
                    Some(table) => self.bind(&r.field, table)?,
                    None => deferred.push(r),
                }
            }

            if deferred.len() == before {
                let r = deferred.remove(0);
                let table = self.resolve_shared_key(r)?;
                self.bind(&r.field, table)?;
            }
            pending = deferred;
        }
        Ok(())
    }

    fn bind(&mut self, field: &str, table: String) -> Result<()> {
        self.use_table(&table)?;
        self.resolved.insert(field.to_string(), table);
        Ok(())
    }

    fn try_resolve(&self, r: &FieldRef) -> Result<Option<String>> {
        let in_context: Vec<&str> = self
            .context
            .iter()
            .map(String::as_str)
            .filter(|t| self.declares(t, &r.field))
            .collect();
        if !in_context.is_empty() {
            return self.pick(r, &in_context).map(Some);
        }

        let candidates = self.schema.tables_with_field(&r.field);
        match candidates.as_slice() {
            [] => Err(TsdbError::resolution(format!("unknown field '{}'", r.field))),
            [only] => Ok(Some(only.to_string())),
            _ => Ok(None),
        }
    }

    fn resolve_shared_key(&self, r: &FieldRef) -> Result<String> {
        let candidates = self.schema.tables_with_field(&r.field);
        self.pick(r, &candidates)
    }

    fn pick(&self, r: &FieldRef, candidates: &[&str]) -> Result<String> {
        let shared_key = candidates.iter().all(|t| {
            self.schema
                .get(t)
                .map_or(false, |relation| relation.is_key(&r.field))
        });
        match candidates {
            [only] => Ok(only.to_string()),
            [first, ..] if shared_key => Ok(first.to_string()),
            _ => Err(TsdbError::resolution(format!(
                "field '{}' is ambiguous between {}; qualify it as table.field",
                r.field,
                candidates.join(", ")
            ))),
        }
    }

    fn declares(&self, table: &str, field: &str) -> bool {
        self.schema
            .get(table)
            .map_or(false, |relation| relation.get_field(field).is_some())
    }

    /// Index of `table.field` in the column list, adding it on first use
    fn column(&mut self, table: &str, field: &str) -> Result<usize> {
        if let Some(i) = self
            .columns
            .iter()
            .position(|c| c.table == table && c.field == field)
        {
            return Ok(i);
        }
        let datatype = self
            .schema
            .get(table)
            .and_then(|relation| relation.get_field(field))
            .map(|f| f.datatype.clone())
            .ok_or_else(|| {
                TsdbError::resolution(format!("table '{}' has no field '{}'", table, field))
            })?;
        self.columns.push(Column {
            table: table.to_string(),
            field: field.to_string(),
            datatype,
        });
        Ok(self.columns.len() - 1)
    }

    fn column_for(&mut self, r: &FieldRef) -> Result<usize> {
        let table = match &r.table {
            Some(table) => table.clone(),
            None => self
                .resolved
                .get(&r.field)
                .cloned()
                .ok_or_else(|| TsdbError::resolution(format!("unknown field '{}'", r.field)))?,
        };
        self.column(&table, &r.field)
    }

    fn lower(&mut self, condition: &Condition) -> Result<FilterExpr> {
        match condition {
            Condition::And(l, r) => Ok(FilterExpr::And(
                Box::new(self.lower(l)?),
                Box::new(self.lower(r)?),
            )),
            Condition::Or(l, r) => Ok(FilterExpr::Or(
                Box::new(self.lower(l)?),
                Box::new(self.lower(r)?),
            )),
            Condition::Not(inner) => Ok(FilterExpr::Not(Box::new(self.lower(inner)?))),
            Condition::Compare {
                field,
                op,
                value,
                position,
            } => {
                let column = self.column_for(field)?;
                let datatype = self.columns[column].datatype.clone();
                lower_comparison(column, field, &datatype, *op, value, *position)
            }
        }
    }

    /// Base table and the hops joining every other table in the query
    fn join_chain(&self) -> Result<(String, Vec<JoinHop>)> {
        let base = self
            .context
            .first()
            .cloned()
            .ok_or_else(|| TsdbError::resolution("query references no table"))?;

        let mut joined: Vec<String> = vec![base.clone()];
        let mut hops = Vec::new();
        for table in self.context.iter().skip(1) {
            if joined.contains(table) {
                continue;
            }
            let sources: Vec<&str> = joined.iter().map(String::as_str).collect();
            let path = join::path_from_any(self.schema, &sources, table)?;
            for hop in path {
                joined.push(hop.table.clone());
                hops.push(hop);
            }
        }
        Ok((base, hops))
    }
}

fn lower_comparison(
    column: usize,
    field: &FieldRef,
    datatype: &DataType,
    op: CompareOp,
    value: &Literal,
    position: usize,
) -> Result<FilterExpr> {
    if *value == Literal::Null {
        return match op {
            CompareOp::Equal => Ok(FilterExpr::Absent {
                column,
                negated: false,
            }),
            CompareOp::NotEqual => Ok(FilterExpr::Absent {
                column,
                negated: true,
            }),
            _ => Err(TsdbError::resolution(format!(
                "'{}' cannot be compared with null using '{}'",
                field, op
            ))),
        };
    }

    let Some(comparison) = Comparison::from_op(op) else {
        if !datatype.is_textual() {
            return Err(TsdbError::resolution(format!(
                "'{}' is a {} field; '{}' needs a string field",
                field, datatype, op
            )));
        }
        let text = match value {
            Literal::String(s) | Literal::Date(s) => s.clone(),
            Literal::Integer(n) => n.to_string(),
            Literal::Null => String::new(),
        };
        let pattern = Regex::new(&text).map_err(|e| {
            TsdbError::syntax(position, format!("invalid regular expression: {}", e))
        })?;
        return Ok(FilterExpr::Regex {
            column,
            pattern,
            negated: op == CompareOp::NotMatch,
        });
    };

    if op.is_ordering() && !datatype.is_ordered() {
        return Err(TsdbError::resolution(format!(
            "'{}' is a {} field; '{}' needs an integer or date field",
            field, datatype, op
        )));
    }

    let mismatch = || {
        TsdbError::syntax(
            position,
            format!("{} is not a valid {} for '{}'", value, datatype, field),
        )
    };
    let typed = match value {
        Literal::Integer(n) => match datatype {
            DataType::Integer => Value::Integer(*n),
            DataType::Date => return Err(mismatch()),
            DataType::String | DataType::Other => Value::String(n.to_string()),
        },
        Literal::String(s) | Literal::Date(s) => {
            if s.is_empty() {
                return Ok(empty_comparison(column, datatype, comparison));
            }
            types::cast(s, datatype).map_err(|_| mismatch())?
        }
        Literal::Null => Value::Null,
    };

    Ok(FilterExpr::Compare {
        column,
        op: comparison,
        value: typed,
    })
}

/// `f = ""` holds for an absent field and for an explicit empty string;
/// `f != ""` needs a present, non-empty value
fn empty_comparison(column: usize, datatype: &DataType, comparison: Comparison) -> FilterExpr {
    let negated = comparison != Comparison::Equal;
    if !datatype.is_textual() {
        return FilterExpr::Absent { column, negated };
    }
    let explicit = FilterExpr::Compare {
        column,
        op: comparison,
        value: Value::from(""),
    };
    if negated {
        explicit
    } else {
        FilterExpr::Or(
            Box::new(FilterExpr::Absent {
                column,
                negated: false,
            }),
            Box::new(explicit),
        )
    }
}
