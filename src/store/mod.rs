//! Storage seams for history rows and live records
//!
//! The tracker writes through the `HistoryStore` trait and reads current
//! record state through `SourceRows`; both are implemented by the embedding
//! persistence layer. `MemoryHistoryStore` and `MemorySource` are reference
//! implementations, `JsonlHistoryStore` keeps the append-only log on disk.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlHistoryStore;
pub use memory::{MemoryHistoryStore, MemorySource};

use serde_json::Value;

use crate::entity::Record;
use crate::error::Result;
use crate::history::HistoryRow;

/// Append-only storage for history rows
///
/// Rows are never updated or deleted; the store assigns each appended row a
/// monotonically increasing `history_id`.
pub trait HistoryStore: Send + Sync {
    /// Append one history row and return its assigned id
    fn append(&self, row: HistoryRow) -> Result<u64>;

    /// All rows for a tracked table, newest first
    /// (`history_date` descending, ties broken by `history_id` descending)
    fn all(&self, table: &str) -> Result<Vec<HistoryRow>>;

    /// Rows whose snapshot field `pk_field` equals `pk`, newest first
    fn for_instance(&self, table: &str, pk_field: &str, pk: &Value) -> Result<Vec<HistoryRow>>;

    /// Number of rows stored for a tracked table
    fn count(&self, table: &str) -> Result<usize>;

    /// Verify snapshot checksums across a table
    fn verify_all(&self, table: &str) -> Result<bool> {
        Ok(self.all(table)?.iter().all(|row| row.verify_checksum()))
    }
}

/// Read access to the current (live) rows of tracked tables
///
/// Used to fetch excluded-field values during reconstruction and to find
/// the join rows affected by a relationship event.
pub trait SourceRows: Send + Sync {
    /// Fetch one live record by primary key
    fn get(&self, table: &str, pk_field: &str, pk: &Value) -> Result<Option<Record>>;

    /// All live records whose `field` equals `value`
    fn filter(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>>;
}

/// Reverse-chronological total order over history rows
pub(crate) fn sort_newest_first(rows: &mut [HistoryRow]) {
    rows.sort_by(|a, b| {
        b.history_date
            .cmp(&a.history_date)
            .then(b.history_id.cmp(&a.history_id))
    });
}
