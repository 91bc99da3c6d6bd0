//! Command-Line Tests
//!
//! Output format and exit status of the `tsdb` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const RELATIONS: &str = "\
item:
  i-id :integer :key
  i-input :string
";

fn tsdb(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tsdb"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn setup_database(dir: &TempDir) -> String {
    let schema = dir.path().join("relations.txt");
    fs::write(&schema, RELATIONS).unwrap();
    let db = dir.path().join("profile");

    let out = tsdb(&[
        "init",
        db.to_str().unwrap(),
        "--schema",
        schema.to_str().unwrap(),
    ]);
    assert!(out.status.success());
    fs::write(db.join("item"), "1@It rained.\n2@a\\sb\n").unwrap();
    db.to_str().unwrap().to_string()
}

fn code(out: &Output) -> i32 {
    out.status.code().unwrap()
}

#[test]
fn test_select_prints_rows() {
    let dir = TempDir::new().unwrap();
    let db = setup_database(&dir);

    let out = tsdb(&["select", "i-id i-input where i-input ~ \"rain\"", &db]);
    assert_eq!(code(&out), 0);
    assert_eq!(String::from_utf8_lossy(&out.stdout), "1@It rained.\n");

    let out = tsdb(&["select", "--raw", "i-input where i-id = 2", &db]);
    assert_eq!(code(&out), 0);
    assert_eq!(String::from_utf8_lossy(&out.stdout), "a\\sb\n");
}

#[test]
fn test_schema_is_printed_back() {
    let dir = TempDir::new().unwrap();
    let db = setup_database(&dir);

    let out = tsdb(&["schema", &db]);
    assert_eq!(code(&out), 0);
    let printed = String::from_utf8_lossy(&out.stdout);
    assert!(printed.starts_with("item:\n"));
    assert!(printed.contains("i-id :integer :key"));
}

#[test]
fn test_exit_codes() {
    let dir = TempDir::new().unwrap();
    let db = setup_database(&dir);

    assert_eq!(code(&tsdb(&["select", "i-id where", &db])), 3);
    assert_eq!(code(&tsdb(&["select", "i-nothing", &db])), 3);

    let missing = dir.path().join("absent");
    assert_eq!(code(&tsdb(&["select", "i-id", missing.to_str().unwrap()])), 4);

    fs::write(Path::new(&db).join("relations"), "item:\n  i-id :number\n").unwrap();
    assert_eq!(code(&tsdb(&["select", "i-id", &db])), 2);
}

#[test]
fn test_init_rejects_bad_schema() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("relations.txt");
    fs::write(&schema, "item:\n").unwrap();
    let db = dir.path().join("profile");

    let out = tsdb(&[
        "init",
        db.to_str().unwrap(),
        "--schema",
        schema.to_str().unwrap(),
    ]);
    assert_eq!(code(&out), 2);
    assert!(String::from_utf8_lossy(&out.stderr).contains("SchemaError"));
}
