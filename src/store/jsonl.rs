//! Append-only JSONL history store
//!
//! One JSON document per line, one file per store. Existing rows are loaded
//! into memory at open; appends go straight to the end of the file. Nothing
//! is ever rewritten in place, matching the append-only contract.

use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::history::HistoryRow;
use crate::store::{sort_newest_first, HistoryStore};

struct Inner {
    file: File,
    rows: HashMap<String, Vec<HistoryRow>>,
    seq: u64,
}

/// History store backed by an append-only JSONL file
pub struct JsonlHistoryStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonlHistoryStore {
    /// Open an existing store or create a new one
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut rows: HashMap<String, Vec<HistoryRow>> = HashMap::new();
        let mut seq = 0;

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let row: HistoryRow = serde_json::from_str(&line)?;
                seq = seq.max(row.history_id);
                rows.entry(row.table.clone()).or_default().push(row);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(Inner { file, rows, seq }),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All tables with at least one history row
    pub fn tables(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut tables: Vec<_> = inner.rows.keys().cloned().collect();
        tables.sort();
        tables
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn append(&self, mut row: HistoryRow) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.seq += 1;
        row.history_id = inner.seq;
        let line = serde_json::to_string(&row)?;
        writeln!(inner.file, "{}", line)?;
        inner.file.flush()?;
        let id = row.history_id;
        inner.rows.entry(row.table.clone()).or_default().push(row);
        Ok(id)
    }

    fn all(&self, table: &str) -> Result<Vec<HistoryRow>> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut found = inner.rows.get(table).cloned().unwrap_or_default();
        sort_newest_first(&mut found);
        Ok(found)
    }

    fn for_instance(&self, table: &str, pk_field: &str, pk: &Value) -> Result<Vec<HistoryRow>> {
        let mut found = self.all(table)?;
        found.retain(|row| row.fields.get(pk_field) == Some(pk));
        Ok(found)
    }

    fn count(&self, table: &str) -> Result<usize> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(inner.rows.get(table).map(Vec::len).unwrap_or(0))
    }
}
