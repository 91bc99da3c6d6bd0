//! Batch processing sink
//!
//! An external process analyses input items one at a time; the caller
//! hands each item and its outcome to a [`ResultSink`], which appends the
//! result rows to the database in submission order. A failed item never
//! stops the batch: it is logged, optionally marked with a placeholder row,
//! and processing continues.
//!
//! Buffered rows live in the database's in-memory tables. They reach disk
//! on [`ResultSink::commit`] or when the buffer fills; dropping the sink
//! commits nothing.

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::database::Database;
use crate::error::{Result, TsdbError};
use crate::record::Record;
use crate::schema::Relation;
use crate::types::Value;

/// Table whose records are fed to the external process by default
pub const DEFAULT_INPUT_TABLE: &str = "item";

/// Field receiving the failure message in placeholder rows
pub const ERROR_FIELD: &str = "error";

/// Sink configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    /// Table the submitted input records belong to
    pub input_table: String,
    /// Commit automatically once this many rows are buffered (0 = at end)
    pub buffer_size: usize,
    /// Table receiving a placeholder row for each failed item
    pub placeholder_table: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            input_table: DEFAULT_INPUT_TABLE.to_string(),
            buffer_size: 0,
            placeholder_table: None,
        }
    }
}

impl From<&DatabaseConfig> for SinkConfig {
    fn from(config: &DatabaseConfig) -> Self {
        SinkConfig {
            buffer_size: config.buffer_size,
            placeholder_table: config.placeholder_table.clone(),
            ..SinkConfig::default()
        }
    }
}

/// Output rows produced for one item
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemResult {
    pub rows: Vec<(String, Record)>,
}

impl ItemResult {
    pub fn new() -> Self {
        ItemResult::default()
    }

    pub fn push(&mut self, table: &str, record: Record) {
        self.rows.push((table.to_string(), record));
    }

    pub fn with_row(mut self, table: &str, record: Record) -> Self {
        self.push(table, record);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Failure reported by the external process for one item
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessError {
    pub message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        ProcessError {
            message: message.into(),
        }
    }
}

pub type ItemOutcome = std::result::Result<ItemResult, ProcessError>;

/// Counters for one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkStats {
    pub items: usize,
    pub failed: usize,
    pub rows: usize,
    pub flushes: usize,
}

type ItemCallback<'a> = Box<dyn FnMut(&Value, &ItemOutcome) + 'a>;

pub struct ResultSink<'a> {
    db: &'a mut Database,
    config: SinkConfig,
    input: Relation,
    on_item: Option<ItemCallback<'a>>,
    /// Tables holding rows not yet committed by this sink
    touched: Vec<String>,
    buffered: usize,
    stats: SinkStats,
}

impl<'a> ResultSink<'a> {
    pub fn new(db: &'a mut Database, config: SinkConfig) -> Result<Self> {
        let input = db
            .schema()
            .get(&config.input_table)
            .ok_or_else(|| {
                TsdbError::resolution(format!("unknown input table '{}'", config.input_table))
            })?
            .clone();

        if let Some(table) = &config.placeholder_table {
            if !db.schema().contains(table) {
                return Err(TsdbError::resolution(format!(
                    "unknown placeholder table '{}'",
                    table
                )));
            }
        }

        Ok(ResultSink {
            db,
            config,
            input,
            on_item: None,
            touched: Vec::new(),
            buffered: 0,
            stats: SinkStats::default(),
        })
    }

    /// Call `callback` with each item's identifier and outcome once the
    /// item has been buffered
    pub fn on_item<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Value, &ItemOutcome) + 'a,
    {
        self.on_item = Some(Box::new(callback));
        self
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    /// Rows buffered since the last commit
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Record the outcome for one input item.
    ///
    /// A failed outcome is absorbed; errors returned here come from the
    /// database (bad result rows, failed automatic commit) and are fatal.
    pub fn submit(&mut self, input: &Record, outcome: ItemOutcome) -> Result<()> {
        let id = self.item_id(input)?;
        self.stats.items += 1;

        match &outcome {
            Ok(result) => {
                for (table, record) in &result.rows {
                    self.check_row(table, record)?;
                }
                for (table, record) in &result.rows {
                    self.append(table, record.clone())?;
                }
                debug!(item = %id, rows = result.len(), "buffered item result");
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(item = %id, error = %e, "item processing failed");
                if let Some(table) = self.config.placeholder_table.clone() {
                    let placeholder = self.placeholder(&table, input, e)?;
                    self.append(&table, placeholder)?;
                }
            }
        }

        if let Some(callback) = self.on_item.as_mut() {
            callback(&id, &outcome);
        }

        if self.config.buffer_size > 0 && self.buffered >= self.config.buffer_size {
            info!(rows = self.buffered, "result buffer full; committing");
            self.commit()?;
        }
        Ok(())
    }

    /// Feed a whole batch and commit at the end
    pub fn run<I>(&mut self, items: I) -> Result<SinkStats>
    where
        I: IntoIterator<Item = (Record, ItemOutcome)>,
    {
        for (input, outcome) in items {
            self.submit(&input, outcome)?;
        }
        self.commit()?;
        Ok(self.stats)
    }

    /// Write every table this sink appended to
    pub fn commit(&mut self) -> Result<()> {
        for table in &self.touched {
            self.db.commit_table(table)?;
        }
        if !self.touched.is_empty() {
            self.stats.flushes += 1;
        }
        self.touched.clear();
        self.buffered = 0;
        Ok(())
    }

    /// Forget buffered rows. Any other uncommitted edit to the same tables
    /// is dropped with them.
    pub fn discard(&mut self) {
        for table in self.touched.drain(..) {
            self.db.discard(&table);
        }
        if self.buffered > 0 {
            debug!(rows = self.buffered, "discarded buffered results");
        }
        self.buffered = 0;
    }

    fn item_id(&self, input: &Record) -> Result<Value> {
        match self.input.fields().iter().position(|f| f.is_key) {
            Some(i) => input.get(&self.input, i),
            None => Ok(Value::Integer(self.stats.items as i64)),
        }
    }

    fn check_row(&mut self, table: &str, record: &Record) -> Result<()> {
        let relation = self.db.table(table)?.relation();
        if record.len() != relation.len() {
            return Err(TsdbError::record(format!(
                "result row has {} fields but '{}' has {}",
                record.len(),
                table,
                relation.len()
            )));
        }
        Ok(())
    }

    fn append(&mut self, table: &str, record: Record) -> Result<()> {
        self.db.table_mut(table)?.append(record)?;
        if !self.touched.iter().any(|t| t == table) {
            self.touched.push(table.to_string());
        }
        self.buffered += 1;
        self.stats.rows += 1;
        Ok(())
    }

    /// Row marking a failed item: the input's key fields plus the message
    fn placeholder(&mut self, table: &str, input: &Record, error: &ProcessError) -> Result<Record> {
        let relation = self.db.table(table)?.relation().clone();

        let mut values = HashMap::new();
        for (i, field) in self.input.fields().iter().enumerate() {
            if field.is_key && relation.get_field(&field.name).is_some() {
                values.insert(field.name.clone(), input.get(&self.input, i)?);
            }
        }
        if let Some(field) = relation.get_field(ERROR_FIELD) {
            if field.datatype.is_textual() {
                values.insert(ERROR_FIELD.to_string(), Value::from(error.message.as_str()));
            }
        }
        Record::from_map(&relation, &values)
    }
}
