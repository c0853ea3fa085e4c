//! Error types for history tracking

use thiserror::Error;

/// Result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// History tracking errors
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("{namespace}.{name} registered multiple times for history tracking (accessor `{accessor}`)")]
    MultipleRegistration {
        namespace: String,
        name: String,
        accessor: String,
    },

    #[error("table `{0}` is not tracked for history")]
    NotTracked(String),

    #[error("{entity} has no field or relation named `{field}`")]
    UnknownField { entity: String, field: String },

    #[error("{entity}.{field} must be a many-to-many relation")]
    NotManyToMany { entity: String, field: String },

    #[error("{entity} has no primary-key field")]
    MissingPrimaryKey { entity: String },

    #[error("cannot resolve source and target sides of join table `{through}`")]
    JoinResolution { through: String },

    #[error("live record missing: {table} pk {pk}")]
    LiveRecordMissing { table: String, pk: serde_json::Value },

    #[error("history row {history_id} failed checksum verification")]
    ChecksumMismatch { history_id: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
