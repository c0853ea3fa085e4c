//! In-memory reference implementations of the storage seams

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::entity::Record;
use crate::error::Result;
use crate::history::HistoryRow;
use crate::store::{sort_newest_first, HistoryStore, SourceRows};

/// In-memory append-only history store
///
/// Clones share the same underlying log, so a handle kept by a test or an
/// embedder observes rows appended through the tracker.
#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    rows: Arc<RwLock<HashMap<String, Vec<HistoryRow>>>>,
    seq: Arc<AtomicU64>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&self, mut row: HistoryRow) -> Result<u64> {
        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        row.history_id = id;
        let mut rows = self.rows.write().unwrap_or_else(|p| p.into_inner());
        rows.entry(row.table.clone()).or_default().push(row);
        Ok(id)
    }

    fn all(&self, table: &str) -> Result<Vec<HistoryRow>> {
        let rows = self.rows.read().unwrap_or_else(|p| p.into_inner());
        let mut found = rows.get(table).cloned().unwrap_or_default();
        sort_newest_first(&mut found);
        Ok(found)
    }

    fn for_instance(&self, table: &str, pk_field: &str, pk: &Value) -> Result<Vec<HistoryRow>> {
        let mut found = self.all(table)?;
        found.retain(|row| row.fields.get(pk_field) == Some(pk));
        Ok(found)
    }

    fn count(&self, table: &str) -> Result<usize> {
        let rows = self.rows.read().unwrap_or_else(|p| p.into_inner());
        Ok(rows.get(table).map(Vec::len).unwrap_or(0))
    }
}

/// In-memory live-row source
///
/// Stands in for the mapper's own storage in tests and small embeddings;
/// clones share the same tables.
#[derive(Clone, Default)]
pub struct MemorySource {
    tables: Arc<RwLock<HashMap<String, Vec<Record>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a live record, keyed by `pk_field`
    pub fn upsert(&self, record: Record, pk_field: &str) {
        let mut tables = self.tables.write().unwrap_or_else(|p| p.into_inner());
        let rows = tables.entry(record.table.clone()).or_default();
        let pk = record.get(pk_field).cloned();
        rows.retain(|r| r.get(pk_field) != pk.as_ref());
        rows.push(record);
    }

    /// Remove live records matching `field == value`
    pub fn remove(&self, table: &str, field: &str, value: &Value) {
        let mut tables = self.tables.write().unwrap_or_else(|p| p.into_inner());
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|r| r.get(field) != Some(value));
        }
    }
}

impl SourceRows for MemorySource {
    fn get(&self, table: &str, pk_field: &str, pk: &Value) -> Result<Option<Record>> {
        let tables = self.tables.read().unwrap_or_else(|p| p.into_inner());
        Ok(tables
            .get(table)
            .and_then(|rows| rows.iter().find(|r| r.get(pk_field) == Some(pk)).cloned()))
    }

    fn filter(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>> {
        let tables = self.tables.read().unwrap_or_else(|p| p.into_inner());
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
