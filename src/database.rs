//! Test suite database
//!
//! A [`Database`] is a directory holding one schema description plus one
//! file per declared table. Tables are loaded on first access and written
//! back together by [`Database::commit`].
//!
//! There is no locking: two handles opened on the same directory do not
//! see each other's uncommitted edits, and modifying the table files
//! externally while a handle is open is the caller's responsibility.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{CompressionPolicy, DatabaseConfig};
use crate::error::{Result, TsdbError};
use crate::join::{self, JoinHop, JoinMode};
use crate::record::Record;
use crate::schema::{parse_schema, Schema};
use crate::table::Table;
use crate::types::Value;

#[derive(Debug)]
pub struct Database {
    root: PathBuf,
    schema: Schema,
    config: DatabaseConfig,
    tables: HashMap<String, Table>,
}

impl Database {
    /// Open an existing database directory
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open_with_config(root, DatabaseConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(root: P, config: DatabaseConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(TsdbError::io(
                &root,
                io::Error::new(io::ErrorKind::NotFound, "database directory not found"),
            ));
        }

        let schema_path = root.join(&config.schema_file);
        let text = fs::read_to_string(&schema_path).map_err(|e| TsdbError::io(&schema_path, e))?;
        let schema = parse_schema(&text)?;

        info!(path = %root.display(), tables = schema.len(), "opened database");

        Ok(Database {
            root,
            schema,
            config,
            tables: HashMap::new(),
        })
    }

    /// Initialize a skeleton directory: the schema file and one empty
    /// file per table
    pub fn create<P: AsRef<Path>>(root: P, schema: &Schema) -> Result<Self> {
        Self::create_with_config(root, schema, DatabaseConfig::default())
    }

    pub fn create_with_config<P: AsRef<Path>>(
        root: P,
        schema: &Schema,
        config: DatabaseConfig,
    ) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| TsdbError::io(root, e))?;

        let schema_path = root.join(&config.schema_file);
        fs::write(&schema_path, schema.to_string()).map_err(|e| TsdbError::io(&schema_path, e))?;

        let compressed = config.compression == CompressionPolicy::Always;
        for relation in schema.tables() {
            let mut table = Table::new(relation.clone());
            table.attach(root);
            table.set_compressed(compressed);
            table.commit()?;
        }

        info!(path = %root.display(), tables = schema.len(), "created database");
        Self::open_with_config(root, config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Make sure `name` is in memory
    pub fn load(&mut self, name: &str) -> Result<()> {
        if self.tables.contains_key(name) {
            return Ok(());
        }
        let relation = self
            .schema
            .get(name)
            .ok_or_else(|| TsdbError::resolution(format!("unknown table '{}'", name)))?
            .clone();
        let table = Table::open(&self.root, relation)?;
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    /// Already-loaded table, if any
    pub fn loaded(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table(&mut self, name: &str) -> Result<&Table> {
        self.load(name)?;
        self.loaded(name)
            .ok_or_else(|| TsdbError::resolution(format!("unknown table '{}'", name)))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.load(name)?;
        self.tables
            .get_mut(name)
            .ok_or_else(|| TsdbError::resolution(format!("unknown table '{}'", name)))
    }

    /// Append a record built from a field mapping; unset fields take defaults
    pub fn insert(&mut self, name: &str, values: &HashMap<String, Value>) -> Result<()> {
        let table = self.table_mut(name)?;
        let record = Record::from_map(table.relation(), values)?;
        table.append(record)
    }

    /// Whether any loaded table has uncommitted edits
    pub fn is_dirty(&self) -> bool {
        self.tables.values().any(Table::is_dirty)
    }

    /// Write every dirty table to disk, in schema order
    pub fn commit(&mut self) -> Result<()> {
        let names: Vec<String> = self.schema.names().map(str::to_string).collect();
        for name in names {
            self.commit_table(&name)?;
        }
        Ok(())
    }

    /// Write one table if it is loaded and dirty
    pub fn commit_table(&mut self, name: &str) -> Result<()> {
        if let Some(table) = self.tables.get_mut(name) {
            if table.is_dirty() {
                let compressed = self.config.compress(table.is_compressed());
                table.set_compressed(compressed);
                table.commit()?;
            }
        }
        Ok(())
    }

    /// Drop uncommitted edits to `name`; the next access reloads from disk
    pub fn discard(&mut self, name: &str) {
        if self.tables.remove(name).is_some() {
            debug!(table = name, "discarded in-memory table");
        }
    }

    /// Join path between two tables of this database
    pub fn path(&self, source: &str, target: &str) -> Result<Vec<JoinHop>> {
        join::path(&self.schema, source, target)
    }

    /// Join `source` to `target` along their join path, pulling in any
    /// intermediate tables
    pub fn join(&mut self, source: &str, target: &str, mode: JoinMode) -> Result<Table> {
        let hops = self.path(source, target)?;
        self.load(source)?;
        for hop in &hops {
            self.load(&hop.table)?;
        }

        let mut joined = self.table(source)?.clone();
        joined.detach();
        for hop in &hops {
            let right = self.table(&hop.table)?;
            joined = join::join_hop(&joined, right, hop, mode)?;
        }
        Ok(joined)
    }
}
