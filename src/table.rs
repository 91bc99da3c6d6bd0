//! Table storage
//!
//! A [`Table`] holds one relation's records in memory. Attached tables are
//! backed by a file named after the table inside the database directory,
//! stored either as plain text or gzip-compressed with a `.gz` suffix.
//! Edits only touch the in-memory copy until [`Table::commit`].

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::slice;
use tracing::{debug, info, warn};

use crate::error::{Result, TsdbError};
use crate::record::Record;
use crate::schema::Relation;

const GZIP_SUFFIX: &str = ".gz";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct Table {
    relation: Relation,
    records: Vec<Record>,
    /// Uncompressed file path; `None` when detached
    path: Option<PathBuf>,
    compressed: bool,
    dirty: bool,
}

impl Table {
    /// Create an empty, detached table
    pub fn new(relation: Relation) -> Self {
        Table {
            relation,
            records: Vec::new(),
            path: None,
            compressed: false,
            dirty: false,
        }
    }

    /// Create a detached table from existing records
    pub fn from_records(relation: Relation, records: Vec<Record>) -> Result<Self> {
        let mut table = Table::new(relation);
        table.extend(records)?;
        table.dirty = false;
        Ok(table)
    }

    /// Load the table file for `relation` from `dir`.
    ///
    /// Both the plain and the `.gz` variant are tried; when neither exists
    /// the result is an empty table attached to the plain path.
    pub fn open(dir: &Path, relation: Relation) -> Result<Self> {
        let path = dir.join(relation.name());
        let gz_path = gz_path_of(&path);

        let (compressed, content) = match (path.is_file(), gz_path.is_file()) {
            (true, gz_exists) => {
                if gz_exists {
                    warn!(
                        table = relation.name(),
                        "both plain and compressed files exist; using the plain file"
                    );
                }
                (false, Some(read_plain(&path)?))
            }
            (false, true) => (true, Some(read_gzip(&gz_path)?)),
            (false, false) => (false, None),
        };

        let mut records = Vec::new();
        if let Some(content) = content {
            let source = if compressed { &gz_path } else { &path };
            for (lineno, line) in split_records(&content).enumerate() {
                let record = Record::from_line(&relation, line).map_err(|e| {
                    TsdbError::corrupt(source, format!("line {}: {}", lineno + 1, e))
                })?;
                records.push(record);
            }
        }

        debug!(
            table = relation.name(),
            rows = records.len(),
            compressed,
            "loaded table"
        );

        Ok(Table {
            relation,
            records,
            path: Some(path),
            compressed,
            dirty: false,
        })
    }

    pub fn name(&self) -> &str {
        self.relation.name()
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Append a record to the in-memory copy
    pub fn append(&mut self, record: Record) -> Result<()> {
        self.check_shape(&record)?;
        self.records.push(record);
        self.dirty = true;
        Ok(())
    }

    pub fn extend<I: IntoIterator<Item = Record>>(&mut self, records: I) -> Result<()> {
        for record in records {
            self.append(record)?;
        }
        Ok(())
    }

    /// Replace the record at `index`
    pub fn update(&mut self, index: usize, record: Record) -> Result<()> {
        self.check_shape(&record)?;
        let len = self.records.len();
        let slot = self.records.get_mut(index).ok_or_else(|| {
            TsdbError::record(format!("index {} out of range for {} rows", index, len))
        })?;
        *slot = record;
        self.dirty = true;
        Ok(())
    }

    /// Remove every record
    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            self.records.clear();
            self.dirty = true;
        }
    }

    /// Whether the in-memory copy differs from disk
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_attached(&self) -> bool {
        self.path.is_some()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Choose the on-disk variant used by the next commit
    pub fn set_compressed(&mut self, compressed: bool) {
        if self.compressed != compressed {
            self.compressed = compressed;
            self.dirty = true;
        }
    }

    /// File the table is written to, accounting for compression
    pub fn path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| {
            if self.compressed {
                gz_path_of(p)
            } else {
                p.clone()
            }
        })
    }

    /// Stop backing the table with a file; edits stay in memory
    pub fn detach(&mut self) {
        self.path = None;
    }

    /// Back the table with the file named after it in `dir`
    pub fn attach(&mut self, dir: &Path) {
        self.path = Some(dir.join(self.relation.name()));
        self.dirty = true;
    }

    /// Write every record to the backing file and clear the dirty flag.
    ///
    /// The file is replaced atomically; the variant not in use is removed
    /// afterwards so only one file represents the table. Detached or clean
    /// tables are left alone.
    pub fn commit(&mut self) -> Result<()> {
        let base = match &self.path {
            Some(p) if self.dirty => p.clone(),
            _ => return Ok(()),
        };
        let (target, stale) = if self.compressed {
            (gz_path_of(&base), base)
        } else {
            let gz = gz_path_of(&base);
            (base, gz)
        };

        let tmp = append_suffix(&target, TEMP_SUFFIX);
        if let Err(e) = self.write_file(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, &target).map_err(|e| TsdbError::io(&target, e))?;

        if stale.is_file() {
            fs::remove_file(&stale).map_err(|e| TsdbError::io(&stale, e))?;
            debug!(path = %stale.display(), "removed stale table variant");
        }

        info!(
            table = self.name(),
            rows = self.records.len(),
            path = %target.display(),
            "committed table"
        );
        self.dirty = false;
        Ok(())
    }

    fn write_file(&self, tmp: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)
            .map_err(|e| TsdbError::io(tmp, e))?;

        let file = if self.compressed {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            self.write_records(&mut encoder, tmp)?;
            let writer = encoder.finish().map_err(|e| TsdbError::io(tmp, e))?;
            writer.into_inner().map_err(|e| TsdbError::io(tmp, e.into_error()))?
        } else {
            let mut writer = BufWriter::new(file);
            self.write_records(&mut writer, tmp)?;
            writer.into_inner().map_err(|e| TsdbError::io(tmp, e.into_error()))?
        };

        file.sync_all().map_err(|e| TsdbError::io(tmp, e))
    }

    fn write_records<W: Write>(&self, writer: &mut W, path: &Path) -> Result<()> {
        for record in &self.records {
            writer
                .write_all(record.to_line().as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|e| TsdbError::io(path, e))?;
        }
        Ok(())
    }

    fn check_shape(&self, record: &Record) -> Result<()> {
        if record.len() != self.relation.len() {
            return Err(TsdbError::record(format!(
                "record has {} fields but '{}' has {}",
                record.len(),
                self.relation.name(),
                self.relation.len()
            )));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = &'a Record;
    type IntoIter = slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn gz_path_of(path: &Path) -> PathBuf {
    append_suffix(path, GZIP_SUFFIX)
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Lines of a table file; each record ends with a newline, the last
/// one optionally
fn split_records(content: &str) -> impl Iterator<Item = &str> {
    content.split_terminator('\n')
}

fn read_plain(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| TsdbError::io(path, e))?;
    String::from_utf8(bytes).map_err(|e| TsdbError::corrupt(path, format!("invalid UTF-8: {}", e)))
}

fn read_gzip(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| TsdbError::io(path, e))?;
    let mut decoder = GzDecoder::new(file);
    let mut bytes = Vec::new();
    decoder
        .read_to_end(&mut bytes)
        .map_err(|e| TsdbError::corrupt(path, format!("decompression error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| TsdbError::corrupt(path, format!("invalid UTF-8: {}", e)))
}
