//! Chronicle
//!
//! Append-only change history for records managed by a relational mapper.
//! Opting a type into tracking synthesizes a parallel historical type with
//! projected copies of its fields, and every create, update and delete of
//! a tracked instance appends one immutable snapshot row attributed to the
//! acting user.
//!
//! ## Features
//!
//! - **Field Projection**: constraints stripped, identities flattened,
//!   references relaxed so snapshots outlive the rows they describe
//! - **Schema Synthesis**: one historical type per tracked type, built at
//!   registration with bookkeeping fields and reverse-chronological order
//! - **Typed Capture Events**: the mapper calls an explicit API for saves,
//!   deletes, drafts and many-to-many changes; no ambient dispatch
//! - **Explicit Acting-User Context**: per-unit-of-work binding instead of
//!   thread-local state
//! - **Checksum Validation**: SHA256 checksums ensure snapshot integrity
//!
//! ## Architecture
//!
//! ```text
//! track(entity, options)
//!     │  project fields ── synthesize historical type ── register
//!     ▼
//! record_saved / record_deleted / relation_changed
//!     │  snapshot in-memory state + acting user
//!     ▼
//! HistoryStore::append          (one immutable row per mutation)
//!     ▼
//! history(table) ── for_instance / reconstruct
//! ```

pub mod checksum;
pub mod context;
pub mod entity;
pub mod error;
pub mod field;
pub mod history;
pub mod options;
pub mod store;
pub mod tracker;

pub use checksum::Checksum;
pub use context::{ActingContext, AmbientUser};
pub use entity::{EntityDef, Record, RelationDef, ThroughRef};
pub use error::{HistoryError, Result};
pub use field::{FieldDef, FieldKind, OnDelete, RelationTarget, StorageEngine};
pub use history::{HistoricalSchema, HistoryRow, HistoryType};
pub use options::TrackingOptions;
pub use store::{HistoryStore, JsonlHistoryStore, MemoryHistoryStore, MemorySource, SourceRows};
pub use tracker::{HistoryHandle, HistoryTracker, RelationAction};
