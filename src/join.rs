//! Join resolution
//!
//! Tables are nodes of a graph whose edges connect two tables declaring the
//! same `:key` field. [`path`] finds the shortest chain of such hops and
//! [`join`] combines two tables on one shared key.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::error::{Result, TsdbError};
use crate::record::Record;
use crate::schema::{Relation, Schema};
use crate::table::Table;
use crate::types::Value;

/// One step of a join path: reach `table` from `from` over `key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinHop {
    pub from: String,
    pub table: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Inner,
    Left,
}

/// Shortest hop sequence from `source` to `target`.
///
/// Ties are broken by schema declaration order, so the result is stable
/// for an unchanged schema. A table reaches itself in zero hops.
pub fn path(schema: &Schema, source: &str, target: &str) -> Result<Vec<JoinHop>> {
    path_from_any(schema, &[source], target)
}

/// Shortest hop sequence from whichever of `sources` is closest to `target`
pub fn path_from_any(schema: &Schema, sources: &[&str], target: &str) -> Result<Vec<JoinHop>> {
    for table in sources.iter().chain(std::iter::once(&target)) {
        if !schema.contains(table) {
            return Err(TsdbError::resolution(format!("unknown table '{}'", table)));
        }
    }
    if sources.contains(&target) {
        return Ok(Vec::new());
    }

    let mut previous: HashMap<&str, JoinHop> = HashMap::new();
    let mut visited: HashSet<&str> = sources.iter().copied().collect();
    let mut queue: VecDeque<&str> = sources.iter().copied().collect();

    while let Some(current) = queue.pop_front() {
        for (neighbor, key) in neighbors(schema, current) {
            if !visited.insert(neighbor) {
                continue;
            }
            previous.insert(
                neighbor,
                JoinHop {
                    from: current.to_string(),
                    table: neighbor.to_string(),
                    key: key.to_string(),
                },
            );
            if neighbor == target {
                let hops = unwind(&previous, sources, target);
                debug!(from = ?sources, to = target, hops = hops.len(), "resolved join path");
                return Ok(hops);
            }
            queue.push_back(neighbor);
        }
    }

    Err(TsdbError::Join {
        from: sources.join(","),
        to: target.to_string(),
    })
}

/// Tables sharing a key with `table`, in declaration order, each with the
/// first shared key in `table`'s field order
fn neighbors<'a>(schema: &'a Schema, table: &str) -> Vec<(&'a str, &'a str)> {
    let Some(relation) = schema.get(table) else {
        return Vec::new();
    };
    schema
        .tables()
        .iter()
        .filter(|other| other.name() != table)
        .filter_map(|other| {
            relation
                .keys()
                .find(|k| other.is_key(&k.name))
                .map(|k| (other.name(), k.name.as_str()))
        })
        .collect()
}

fn unwind(previous: &HashMap<&str, JoinHop>, sources: &[&str], target: &str) -> Vec<JoinHop> {
    let mut hops = Vec::new();
    let mut current = target;
    while !sources.contains(&current) {
        match previous.get(current) {
            Some(hop) => {
                hops.push(hop.clone());
                current = hop.from.as_str();
            }
            None => break,
        }
    }
    hops.reverse();
    hops
}

/// Join two tables on `key`.
///
/// On the left side the first key-flagged field named `key` is used; the
/// right side must declare `key` itself. The result is detached and its
/// relation lists the left fields followed by the right fields, each still
/// tagged with its source table.
pub fn join(left: &Table, right: &Table, key: &str, mode: JoinMode) -> Result<Table> {
    let left_index = key_position(left.relation(), None, key)?;
    let right_index = key_position(right.relation(), None, key)?;
    join_at(left, left_index, right, right_index, mode)
}

/// Join along one hop of a path, taking the left key from `hop.from`
pub fn join_hop(left: &Table, right: &Table, hop: &JoinHop, mode: JoinMode) -> Result<Table> {
    let left_index = key_position(left.relation(), Some(hop.from.as_str()), &hop.key)?;
    let right_index = key_position(right.relation(), None, &hop.key)?;
    join_at(left, left_index, right, right_index, mode)
}

fn key_position(relation: &Relation, table: Option<&str>, key: &str) -> Result<usize> {
    let positions = relation.positions(table, key);
    positions
        .iter()
        .copied()
        .find(|&i| relation.fields()[i].is_key)
        .or_else(|| positions.first().copied())
        .ok_or_else(|| {
            TsdbError::resolution(format!("'{}' has no field '{}'", relation.name(), key))
        })
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum JoinKey {
    Typed(Value),
    Raw(String),
}

fn join_key(record: &Record, relation: &Relation, index: usize, typed: bool) -> Result<JoinKey> {
    if typed {
        record.get(relation, index).map(JoinKey::Typed)
    } else {
        Ok(JoinKey::Raw(record.raw(index).unwrap_or("").to_string()))
    }
}

/// Left fields followed by right fields
fn joined_relation(left: &Relation, right: &Relation) -> Result<Relation> {
    let mut fields = left.fields().to_vec();
    fields.extend(right.fields().iter().cloned());
    Relation::new(&format!("{}+{}", left.name(), right.name()), fields)
}

/// What one left row meets on the right side of a hop
#[derive(Debug)]
pub(crate) enum Candidate {
    /// Index of a right row with an equal key
    Match(usize),
    /// A right row whose key could not be cast
    Failed(TsdbError),
}

/// Hash index over the right side of one hop, looked up one left row at a time
pub(crate) struct HopIndex<'t> {
    right: &'t Table,
    left: Relation,
    left_index: usize,
    typed: bool,
    relation: Relation,
    matches: HashMap<JoinKey, Vec<usize>>,
    /// Right rows with an uncastable key; reported once, then forgotten
    failed: Vec<(usize, TsdbError)>,
}

impl<'t> HopIndex<'t> {
    fn new(left: &Relation, left_index: usize, right: &'t Table, right_index: usize) -> Result<Self> {
        let rrel = right.relation();
        let typed = left.fields()[left_index].datatype == rrel.fields()[right_index].datatype;

        let mut matches: HashMap<JoinKey, Vec<usize>> = HashMap::new();
        let mut failed = Vec::new();
        for (i, record) in right.iter().enumerate() {
            match join_key(record, rrel, right_index, typed) {
                Ok(key) => matches.entry(key).or_default().push(i),
                Err(e) => failed.push((i, e)),
            }
        }
        if !failed.is_empty() {
            debug!(table = rrel.name(), rows = failed.len(), "join keys failed to cast");
        }

        Ok(HopIndex {
            right,
            left: left.clone(),
            left_index,
            typed,
            relation: joined_relation(left, rrel)?,
            matches,
            failed,
        })
    }

    /// Index `right` for rows of `left` along `hop`
    pub(crate) fn for_hop(left: &Relation, right: &'t Table, hop: &JoinHop) -> Result<Self> {
        let left_index = key_position(left, Some(hop.from.as_str()), &hop.key)?;
        let right_index = key_position(right.relation(), None, &hop.key)?;
        Self::new(left, left_index, right, right_index)
    }

    /// Relation of the rows this hop produces
    pub(crate) fn relation(&self) -> &Relation {
        &self.relation
    }

    pub(crate) fn right(&self) -> &'t Table {
        self.right
    }

    /// Right rows paired with `record`, in right-table order.
    ///
    /// Fails when the left key does not cast. Right rows whose own key
    /// failed come out once, among the candidates of the first row looked up.
    pub(crate) fn candidates(&mut self, record: &Record) -> Result<Vec<Candidate>> {
        let key = join_key(record, &self.left, self.left_index, self.typed)?;
        let mut found: Vec<(usize, Candidate)> = self
            .matches
            .get(&key)
            .map(|rows| rows.iter().map(|&i| (i, Candidate::Match(i))).collect())
            .unwrap_or_default();
        found.extend(self.failed.drain(..).map(|(i, e)| (i, Candidate::Failed(e))));
        found.sort_by_key(|(i, _)| *i);
        Ok(found.into_iter().map(|(_, c)| c).collect())
    }
}

fn join_at(
    left: &Table,
    left_index: usize,
    right: &Table,
    right_index: usize,
    mode: JoinMode,
) -> Result<Table> {
    let mut index = HopIndex::new(left.relation(), left_index, right, right_index)?;
    let empty_right = match mode {
        JoinMode::Left => Some(Record::defaults(right.relation())?),
        JoinMode::Inner => None,
    };

    let mut records = Vec::new();
    for record in left {
        let mut matched = false;
        for candidate in index.candidates(record)? {
            match candidate {
                Candidate::Match(i) => {
                    matched = true;
                    records.push(record.concat(&right.records()[i]));
                }
                Candidate::Failed(e) => return Err(e),
            }
        }
        if let (false, Some(defaults)) = (matched, &empty_right) {
            records.push(record.concat(defaults));
        }
    }

    Table::from_records(index.relation, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;

    const SCHEMA: &str = "\
item:
  i-id :integer :key
  i-input :string
parse:
  parse-id :integer :key
  i-id :integer :key
  readings :integer
result:
  parse-id :integer :key
  result-id :integer
  mrs :string
run:
  run-id :integer :key
fold:
  f-id :integer :key
";

    fn schema() -> Schema {
        parse_schema(SCHEMA).unwrap()
    }

    fn table(schema: &Schema, name: &str, rows: &[&str]) -> Table {
        let rel = schema.get(name).unwrap().clone();
        let records = rows
            .iter()
            .map(|line| Record::from_line(&rel, line).unwrap())
            .collect();
        Table::from_records(rel, records).unwrap()
    }

    #[test]
    fn test_path_single_hop() {
        let hops = path(&schema(), "item", "parse").unwrap();
        assert_eq!(
            hops,
            vec![JoinHop {
                from: "item".to_string(),
                table: "parse".to_string(),
                key: "i-id".to_string(),
            }]
        );
    }

    #[test]
    fn test_path_multi_hop_is_deterministic() {
        let s = schema();
        let first = path(&s, "item", "result").unwrap();
        let second = path(&s, "item", "result").unwrap();
        assert_eq!(first, second);

        let tables: Vec<&str> = first.iter().map(|h| h.table.as_str()).collect();
        let keys: Vec<&str> = first.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(tables, vec!["parse", "result"]);
        assert_eq!(keys, vec!["i-id", "parse-id"]);
    }

    #[test]
    fn test_path_to_self_and_unreachable() {
        let s = schema();
        assert!(path(&s, "item", "item").unwrap().is_empty());

        let err = path(&s, "item", "fold").unwrap_err();
        assert_eq!(err.name(), "JoinError");

        let err = path(&s, "item", "nope").unwrap_err();
        assert_eq!(err.name(), "QueryResolutionError");
    }

    #[test]
    fn test_inner_join_cardinality() {
        let s = schema();
        let item = table(&s, "item", &["1@It rained.", "2@Dogs bark."]);
        let parse = table(&s, "parse", &["10@1@1", "20@1@2", "30@2@1"]);

        let joined = join(&item, &parse, "i-id", JoinMode::Inner).unwrap();
        assert_eq!(joined.len(), 3);
        assert!(!joined.is_attached());
        assert_eq!(joined.relation().len(), 5);

        let parse_ids: Vec<&str> = joined.iter().map(|r| r.raw(2).unwrap()).collect();
        assert_eq!(parse_ids, vec!["10", "20", "30"]);
    }

    #[test]
    fn test_left_join_keeps_unmatched() {
        let s = schema();
        let item = table(&s, "item", &["1@It rained.", "2@Dogs bark.", "3@Unparsed."]);
        let parse = table(&s, "parse", &["10@1@1", "20@1@2", "30@2@1"]);

        let joined = join(&item, &parse, "i-id", JoinMode::Left).unwrap();
        assert_eq!(joined.len(), 4);

        let last = joined.get(3).unwrap();
        assert_eq!(last.raw(0), Some("3"));
        assert_eq!(last.get(joined.relation(), 2).unwrap(), Value::Integer(-1));
        assert!(last.is_absent(joined.relation(), 2));
    }

    #[test]
    fn test_join_hop_uses_source_table_key() {
        let s = schema();
        let item = table(&s, "item", &["1@It rained."]);
        let parse = table(&s, "parse", &["10@1@1"]);
        let result = table(&s, "result", &["10@0@[ ]", "10@1@[ x ]", "99@0@[ y ]"]);

        let hops = path(&s, "item", "result").unwrap();
        let first = join_hop(&item, &parse, &hops[0], JoinMode::Inner).unwrap();
        let second = join_hop(&first, &result, &hops[1], JoinMode::Inner).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second.relation().source_tables(), vec!["item", "parse", "result"]);
    }

    #[test]
    fn test_bad_right_key_fails_the_join() {
        let s = schema();
        let item = table(&s, "item", &["1@It rained."]);
        let parse = Table::from_records(
            s.get("parse").unwrap().clone(),
            vec![Record::new(vec![
                Some("10".to_string()),
                Some("x".to_string()),
                Some("1".to_string()),
            ])],
        )
        .unwrap();

        let err = join(&item, &parse, "i-id", JoinMode::Inner).unwrap_err();
        assert_eq!(err.name(), "CastError");
    }

    #[test]
    fn test_hop_index_reports_failed_rows_once() {
        let s = schema();
        let parse = Table::from_records(
            s.get("parse").unwrap().clone(),
            vec![
                Record::from_line(s.get("parse").unwrap(), "10@1@1").unwrap(),
                Record::new(vec![
                    Some("20".to_string()),
                    Some("x".to_string()),
                    Some("1".to_string()),
                ]),
            ],
        )
        .unwrap();
        let item = table(&s, "item", &["1@It rained.", "2@Dogs bark."]);
        let hops = path(&s, "item", "parse").unwrap();
        let mut index = HopIndex::for_hop(item.relation(), &parse, &hops[0]).unwrap();

        let first = index.candidates(item.get(0).unwrap()).unwrap();
        assert_eq!(first.len(), 2);
        assert!(matches!(first[0], Candidate::Match(0)));
        assert!(matches!(first[1], Candidate::Failed(_)));

        let second = index.candidates(item.get(1).unwrap()).unwrap();
        assert!(second.is_empty());
        assert_eq!(index.relation().len(), 5);
    }
}
