//! Query Executor
//!
//! Walks the join chain a [`QueryPlan`] asks for one base row at a time:
//! each hop is a hash index over its right table, and rows are joined,
//! filtered and projected only as the caller advances [`QueryRows`].
//! Dropping the iterator early leaves nothing behind.

use std::borrow::Cow;
use std::vec;

use crate::database::Database;
use crate::error::{Result, TsdbError};
use crate::join::{Candidate, HopIndex};
use crate::record::Record;
use crate::schema::Relation;
use crate::table::Table;
use crate::tsql_ir::{FilterExpr, QueryPlan};
use crate::types::Value;

/// Parse `query` against the database schema and start evaluating it
pub fn select<'a>(query: &str, db: &'a mut Database) -> Result<QueryRows<'a>> {
    let plan = QueryPlan::parse(query, db.schema())?;
    execute(&plan, db)
}

/// Evaluate a plan. Tables are loaded and indexed up front; joining,
/// filtering and projection happen as rows are pulled, so a bad value
/// surfaces on the row it belongs to.
pub fn execute<'a>(plan: &QueryPlan, db: &'a mut Database) -> Result<QueryRows<'a>> {
    for table in plan.tables() {
        db.load(table)?;
    }
    let db: &'a Database = db;

    let base = loaded(db, &plan.base)?;
    let mut hops: Vec<HopIndex<'a>> = Vec::with_capacity(plan.joins.len());
    for hop in &plan.joins {
        let right = loaded(db, &hop.table)?;
        let left = hops.last().map_or(base.relation(), HopIndex::relation);
        let index = HopIndex::for_hop(left, right, hop)?;
        hops.push(index);
    }
    let relation = hops
        .last()
        .map_or(base.relation(), HopIndex::relation)
        .clone();

    let slots = plan
        .columns
        .iter()
        .map(|c| {
            relation
                .positions(Some(&c.table), &c.field)
                .first()
                .copied()
                .ok_or_else(|| TsdbError::resolution(format!("column '{}' missing from join", c)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryRows {
        base,
        hops,
        relation,
        plan: plan.clone(),
        slots,
        next: 0,
        frames: Vec::new(),
    })
}

fn loaded<'a>(db: &'a Database, name: &str) -> Result<&'a Table> {
    db.loaded(name)
        .ok_or_else(|| TsdbError::resolution(format!("unknown table '{}'", name)))
}

/// A row joined through the first `n` hops, with what hop `n` pairs it with
struct Frame<'a> {
    record: Cow<'a, Record>,
    pending: vec::IntoIter<Candidate>,
}

/// Lazy query result; each item is one projected row
pub struct QueryRows<'a> {
    base: &'a Table,
    hops: Vec<HopIndex<'a>>,
    /// Relation of fully joined rows
    relation: Relation,
    plan: QueryPlan,
    /// Position of each plan column in the joined relation
    slots: Vec<usize>,
    /// Next base row
    next: usize,
    /// Rows part way through the join chain, one per hop reached
    frames: Vec<Frame<'a>>,
}

impl<'a> QueryRows<'a> {
    /// Qualified names of the projected columns
    pub fn columns(&self) -> Vec<String> {
        self.plan
            .projected_columns()
            .map(|c| c.qualified_name())
            .collect()
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    fn project(&self, record: &Record) -> Result<Vec<Value>> {
        self.plan
            .projection
            .iter()
            .map(|&column| record.get(&self.relation, self.slots[column]))
            .collect()
    }

    /// Look up `record` in hop `depth` and queue what it pairs with
    fn push_frame(&mut self, depth: usize, record: Cow<'a, Record>) -> Result<()> {
        let pending = self.hops[depth].candidates(&record)?.into_iter();
        self.frames.push(Frame { record, pending });
        Ok(())
    }

    /// Next fully joined row, depth first in base and right-table order
    fn next_joined(&mut self) -> Option<Result<Cow<'a, Record>>> {
        loop {
            let depth = self.frames.len().wrapping_sub(1);
            if let Some(frame) = self.frames.last_mut() {
                match frame.pending.next() {
                    None => {
                        self.frames.pop();
                    }
                    Some(Candidate::Failed(e)) => return Some(Err(e)),
                    Some(Candidate::Match(i)) => {
                        let right: &'a Table = self.hops[depth].right();
                        let record = frame.record.concat(&right.records()[i]);
                        if depth + 1 == self.hops.len() {
                            return Some(Ok(Cow::Owned(record)));
                        }
                        if let Err(e) = self.push_frame(depth + 1, Cow::Owned(record)) {
                            return Some(Err(e));
                        }
                    }
                }
                continue;
            }

            let base: &'a Table = self.base;
            let record = base.get(self.next)?;
            self.next += 1;
            if self.hops.is_empty() {
                return Some(Ok(Cow::Borrowed(record)));
            }
            if let Err(e) = self.push_frame(0, Cow::Borrowed(record)) {
                return Some(Err(e));
            }
        }
    }
}

impl Iterator for QueryRows<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.next_joined()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };

            let keep = match &self.plan.filter {
                Some(filter) => evaluate_filter(filter, &record, &self.relation, &self.slots),
                None => Ok(true),
            };
            match keep {
                Ok(true) => return Some(self.project(&record)),
                Ok(false) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Evaluate a filter against one joined row.
///
/// A comparison on an absent field is false; only an explicit absence
/// check can match it.
pub fn evaluate_filter(
    expr: &FilterExpr,
    record: &Record,
    relation: &Relation,
    slots: &[usize],
) -> Result<bool> {
    match expr {
        FilterExpr::And(l, r) => Ok(evaluate_filter(l, record, relation, slots)?
            && evaluate_filter(r, record, relation, slots)?),
        FilterExpr::Or(l, r) => Ok(evaluate_filter(l, record, relation, slots)?
            || evaluate_filter(r, record, relation, slots)?),
        FilterExpr::Not(inner) => Ok(!evaluate_filter(inner, record, relation, slots)?),
        FilterExpr::Compare { column, op, value } => {
            let slot = slots[*column];
            if record.is_absent(relation, slot) {
                return Ok(false);
            }
            let field_value = record.get(relation, slot)?;
            Ok(field_value
                .compare(value)
                .map_or(false, |ordering| op.holds(ordering)))
        }
        FilterExpr::Regex {
            column,
            pattern,
            negated,
        } => {
            let slot = slots[*column];
            if record.is_absent(relation, slot) {
                return Ok(false);
            }
            let text = record.raw(slot).unwrap_or("");
            Ok(pattern.is_match(text) != *negated)
        }
        FilterExpr::Absent { column, negated } => {
            Ok(record.is_absent(relation, slots[*column]) != *negated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;
    use tempfile::TempDir;

    const SCHEMA: &str = "\
item:
  i-id :integer :key
  i-input :string
  i-wf :integer
parse:
  parse-id :integer :key
  i-id :integer :key
  readings :integer
";

    fn database(dir: &TempDir) -> Database {
        let schema = parse_schema(SCHEMA).unwrap();
        let mut db = Database::create(dir.path().join("db"), &schema).unwrap();
        {
            let item = db.table_mut("item").unwrap();
            for line in ["1@It rained.@1", "2@Dogs bark.@1", "3@@0"] {
                let record = Record::from_line(item.relation(), line).unwrap();
                item.append(record).unwrap();
            }
        }
        {
            let parse = db.table_mut("parse").unwrap();
            for line in ["10@1@1", "20@1@2", "30@2@1"] {
                let record = Record::from_line(parse.relation(), line).unwrap();
                parse.append(record).unwrap();
            }
        }
        db.commit().unwrap();
        db
    }

    fn rows(query: &str, db: &mut Database) -> Vec<Vec<Value>> {
        select(query, db)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_regex_select() {
        let dir = TempDir::new().unwrap();
        let mut db = database(&dir);
        assert_eq!(
            rows("i-id i-input where i-input ~ \"rain\"", &mut db),
            vec![vec![Value::from(1), Value::from("It rained.")]]
        );
        assert_eq!(rows("i-id where i-input !~ \"rain\"", &mut db), vec![vec![Value::from(2)]]);
    }

    #[test]
    fn test_join_select() {
        let dir = TempDir::new().unwrap();
        let mut db = database(&dir);
        let result = rows("i-input parse-id where readings = 1", &mut db);
        assert_eq!(
            result,
            vec![
                vec![Value::from("It rained."), Value::from(10)],
                vec![Value::from("Dogs bark."), Value::from(30)],
            ]
        );
    }

    #[test]
    fn test_absent_fields() {
        let dir = TempDir::new().unwrap();
        let mut db = database(&dir);
        assert_eq!(rows("i-id where i-input = null", &mut db), vec![vec![Value::from(3)]]);
        assert_eq!(rows("i-id where i-input != null", &mut db).len(), 2);
        // comparisons on an absent field never hold, negated or not
        assert_eq!(rows("i-id where i-input != \"x\"", &mut db).len(), 2);
        assert_eq!(rows("i-id where !(i-input = \"x\")", &mut db).len(), 3);
    }

    #[test]
    fn test_columns_and_early_drop() {
        let dir = TempDir::new().unwrap();
        let mut db = database(&dir);
        let mut result = select("i-id i-wf from item", &mut db).unwrap();
        assert_eq!(result.columns(), vec!["item.i-id", "item.i-wf"]);
        assert_eq!(result.next().unwrap().unwrap(), vec![Value::from(1), Value::from(1)]);
        drop(result);
        assert!(!db.is_dirty());
    }

    #[test]
    fn test_cast_error_surfaces_on_its_row() {
        let dir = TempDir::new().unwrap();
        let mut db = database(&dir);
        {
            let item = db.table_mut("item").unwrap();
            let bad = Record::new(vec![
                Some("4".to_string()),
                Some("Bad.".to_string()),
                Some("x".to_string()),
            ]);
            item.append(bad).unwrap();
        }
        let result: Vec<_> = select("i-id where i-wf = 1", &mut db).unwrap().collect();
        assert_eq!(result.len(), 3);
        assert!(result[0].is_ok());
        assert!(result[1].is_ok());
        assert_eq!(result[2].as_ref().unwrap_err().name(), "CastError");
    }

    fn append_raw(db: &mut Database, table: &str, fields: &[&str]) {
        let record = Record::new(fields.iter().map(|f| Some(f.to_string())).collect());
        db.table_mut(table).unwrap().append(record).unwrap();
    }

    #[test]
    fn test_bad_right_join_key_surfaces_lazily() {
        let dir = TempDir::new().unwrap();
        let schema = parse_schema(SCHEMA).unwrap();
        let mut db = Database::create(dir.path().join("db"), &schema).unwrap();
        append_raw(&mut db, "item", &["1", "It rained.", "1"]);
        append_raw(&mut db, "item", &["2", "Dogs bark.", "1"]);
        append_raw(&mut db, "parse", &["10", "1", "1"]);
        append_raw(&mut db, "parse", &["20", "x", "1"]);

        let result: Vec<_> = select("i-input parse-id", &mut db).unwrap().collect();
        assert_eq!(result.len(), 2);
        assert_eq!(
            result[0].as_ref().unwrap(),
            &vec![Value::from("It rained."), Value::from(10)]
        );
        assert_eq!(result[1].as_ref().unwrap_err().name(), "CastError");
    }

    #[test]
    fn test_bad_left_join_key_surfaces_on_its_row() {
        let dir = TempDir::new().unwrap();
        let mut db = database(&dir);
        append_raw(&mut db, "item", &["y", "Broken.", "1"]);
        append_raw(&mut db, "item", &["2", "Again.", "1"]);

        let mut result = select("i-input parse-id", &mut db).unwrap();
        let good: Vec<_> = result.by_ref().take(3).collect::<Result<_>>().unwrap();
        assert_eq!(good.len(), 3);
        assert_eq!(result.next().unwrap().unwrap_err().name(), "CastError");
        assert_eq!(
            result.next().unwrap().unwrap(),
            vec![Value::from("Again."), Value::from(30)]
        );
        assert!(result.next().is_none());
    }

    #[test]
    fn test_explicit_empty_string_matches_empty_literal() {
        let dir = TempDir::new().unwrap();
        let mut db = database(&dir);
        {
            let item = db.table_mut("item").unwrap();
            let record = Record::from_values(
                item.relation(),
                &[Value::from(4), Value::from(""), Value::from(1)],
            )
            .unwrap();
            item.append(record).unwrap();
        }
        assert_eq!(
            rows("i-id i-input where i-input = \"\"", &mut db),
            vec![
                vec![Value::from(3), Value::Null],
                vec![Value::from(4), Value::from("")],
            ]
        );
        assert_eq!(rows("i-id where i-input = null", &mut db), vec![vec![Value::from(3)]]);
        assert_eq!(rows("i-id where i-input != \"\"", &mut db).len(), 2);
    }
}
