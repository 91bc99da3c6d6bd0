//! Batch Processing Tests
//!
//! A run over several items where the analysing process fails on some of
//! them: results for the others must still be committed, with failures
//! marked by placeholder rows.

use std::cell::RefCell;
use tempfile::TempDir;
use tsdb_core::*;

const RELATIONS: &str = "\
item:
  i-id :integer :key
  i-input :string
parse:
  parse-id :integer :key
  i-id :integer :key
  readings :integer
  error :string
";

fn setup_database(dir: &TempDir) -> Database {
    let schema = parse_schema(RELATIONS).unwrap();
    let mut db = Database::create(dir.path().join("profile"), &schema).unwrap();
    {
        let item = db.table_mut("item").unwrap();
        for line in ["1@It rained.", "2@Colorless green ideas.", "3@Dogs bark."] {
            let record = Record::from_line(item.relation(), line).unwrap();
            item.append(record).unwrap();
        }
    }
    db.commit().unwrap();
    db
}

/// Stand-in for the external analysis: fails on item 2
fn analyse(db: &Database, item: &Record) -> ItemOutcome {
    let items = db.schema().get("item").unwrap();
    let parses = db.schema().get("parse").unwrap();
    let id = item.value(items, "i-id").unwrap().as_i64().unwrap();
    if id == 2 {
        return Err(ProcessError::new("edge limit exhausted"));
    }
    let row = Record::from_values(
        parses,
        &[Value::from(id * 10), Value::from(id), Value::from(1), Value::Null],
    )
    .unwrap();
    Ok(ItemResult::new().with_row("parse", row))
}

fn batch(db: &mut Database) -> Vec<(Record, ItemOutcome)> {
    let items: Vec<Record> = db.table("item").unwrap().iter().cloned().collect();
    items
        .into_iter()
        .map(|item| {
            let outcome = analyse(db, &item);
            (item, outcome)
        })
        .collect()
}

#[test]
fn test_failed_item_does_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let mut db = setup_database(&dir);
    let items = batch(&mut db);
    let root = db.root().to_path_buf();

    let config = SinkConfig {
        placeholder_table: Some("parse".to_string()),
        ..SinkConfig::default()
    };
    let stats = ResultSink::new(&mut db, config).unwrap().run(items).unwrap();
    assert_eq!(
        stats,
        SinkStats {
            items: 3,
            failed: 1,
            rows: 3,
            flushes: 1,
        }
    );

    let mut committed = Database::open(&root).unwrap();
    let parse = committed.table("parse").unwrap();
    let relation = parse.relation();
    assert_eq!(parse.len(), 3);

    let results: Vec<&Record> = parse
        .iter()
        .filter(|r| !r.is_absent(relation, 0))
        .collect();
    assert_eq!(results.len(), 2);

    let placeholder = parse.get(1).unwrap();
    assert!(placeholder.is_absent(relation, 0));
    assert_eq!(placeholder.value(relation, "i-id").unwrap(), Value::from(2));
    assert_eq!(
        placeholder.value(relation, "error").unwrap(),
        Value::from("edge limit exhausted")
    );
}

#[test]
fn test_failures_without_placeholder_table() {
    let dir = TempDir::new().unwrap();
    let mut db = setup_database(&dir);
    let items = batch(&mut db);
    let root = db.root().to_path_buf();

    let stats = ResultSink::new(&mut db, SinkConfig::default())
        .unwrap()
        .run(items)
        .unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.rows, 2);

    let mut committed = Database::open(&root).unwrap();
    let item_ids: Vec<String> = select("i-id from parse", &mut committed)
        .unwrap()
        .map(|row| row.unwrap()[0].to_string())
        .collect();
    assert_eq!(item_ids, vec!["1", "3"]);
}

#[test]
fn test_callback_sees_every_item_in_order() {
    let dir = TempDir::new().unwrap();
    let mut db = setup_database(&dir);
    let items = batch(&mut db);

    let seen = RefCell::new(Vec::new());
    {
        let mut sink = ResultSink::new(&mut db, SinkConfig::default())
            .unwrap()
            .on_item(|id, outcome| seen.borrow_mut().push((id.to_string(), outcome.is_ok())));
        sink.run(items).unwrap();
    }
    assert_eq!(
        seen.into_inner(),
        vec![
            ("1".to_string(), true),
            ("2".to_string(), false),
            ("3".to_string(), true),
        ]
    );
}

#[test]
fn test_buffer_size_from_database_config() {
    let dir = TempDir::new().unwrap();
    let mut db = setup_database(&dir);
    let items = batch(&mut db);

    let config = DatabaseConfig {
        buffer_size: 1,
        placeholder_table: Some("parse".to_string()),
        ..DatabaseConfig::default()
    };
    let sink_config = SinkConfig::from(&config);
    assert_eq!(sink_config.input_table, "item");

    let stats = ResultSink::new(&mut db, sink_config).unwrap().run(items).unwrap();
    // one flush per row; the final commit has nothing left to write
    assert_eq!(stats.flushes, 3);
}

#[test]
fn test_results_are_queryable_after_run() {
    let dir = TempDir::new().unwrap();
    let mut db = setup_database(&dir);
    let items = batch(&mut db);
    ResultSink::new(&mut db, SinkConfig::default())
        .unwrap()
        .run(items)
        .unwrap();

    let result: Vec<Vec<Value>> = select("i-input parse-id where readings = 1", &mut db)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(
        result,
        vec![
            vec![Value::from("It rained."), Value::from(10)],
            vec![Value::from("Dogs bark."), Value::from(30)],
        ]
    );
}
