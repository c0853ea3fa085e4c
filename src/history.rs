//! Historical schema synthesis and history rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::checksum::Checksum;
use crate::entity::EntityDef;
use crate::field::{project, FieldDef, OnDelete, StorageEngine};
use crate::options::TrackingOptions;

/// Kind of change captured by a history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryType {
    #[serde(rename = "+")]
    Created,
    #[serde(rename = "~")]
    Changed,
    #[serde(rename = "-")]
    Deleted,
    /// Speculative snapshot of an instance that was not persisted
    #[serde(rename = "#")]
    Drafted,
}

impl HistoryType {
    /// Single-character storage code
    pub fn code(&self) -> char {
        match self {
            HistoryType::Created => '+',
            HistoryType::Changed => '~',
            HistoryType::Deleted => '-',
            HistoryType::Drafted => '#',
        }
    }

    /// Parse a storage code
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            '+' => Some(HistoryType::Created),
            '~' => Some(HistoryType::Changed),
            '-' => Some(HistoryType::Deleted),
            '#' => Some(HistoryType::Drafted),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HistoryType::Created => "Created",
            HistoryType::Changed => "Changed",
            HistoryType::Deleted => "Deleted",
            HistoryType::Drafted => "Drafted",
        }
    }
}

impl fmt::Display for HistoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The synthesized historical type paired with a tracked type
///
/// Holds the projected snapshot fields plus the bookkeeping fields, and the
/// display metadata the mapper needs to install the type as a sibling of
/// the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalSchema {
    /// Type name, e.g. "HistoricalPoll"
    pub name: String,
    /// Same namespace as the tracked type
    pub namespace: String,
    /// Storage table for history rows
    pub table: String,
    pub verbose_name: String,
    /// Base type names mixed in for shared behavior
    pub bases: Vec<String>,
    /// Projected copies of the tracked type's fields
    pub fields: Vec<FieldDef>,
    /// history_id, history_date, history_user, history_change_reason,
    /// history_type
    pub bookkeeping: Vec<FieldDef>,
    /// Display ordering, newest first
    pub ordering: Vec<String>,
    pub latest_by: String,
    /// Fields omitted from every snapshot
    pub excluded_fields: Vec<String>,
}

impl HistoricalSchema {
    /// All fields of the historical type, bookkeeping first
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.bookkeeping.iter().chain(self.fields.iter())
    }
}

/// The tracked type's fields minus the excluded ones
pub(crate) fn fields_included<'a>(
    entity: &'a EntityDef,
    excluded: &[String],
) -> Vec<&'a FieldDef> {
    entity
        .fields
        .iter()
        .filter(|f| !excluded.iter().any(|e| e == &f.name))
        .collect()
}

fn bookkeeping_fields(options: &TrackingOptions) -> Vec<FieldDef> {
    let user_related_name = options
        .user_related_name
        .clone()
        .unwrap_or_else(|| "+".to_string());
    vec![
        FieldDef::auto("history_id"),
        FieldDef::datetime("history_date"),
        FieldDef::char("history_change_reason", 100).with_nullable(),
        FieldDef::foreign_key("history_user", options.user_table.clone())
            .with_nullable()
            .with_on_delete(OnDelete::SetNull)
            .with_related_name(user_related_name),
        FieldDef::char("history_type", 1),
    ]
}

/// Build the historical type for a tracked entity.
///
/// Invoked exactly once per tracked type, at registration; the caller is
/// responsible for rejecting re-registration.
pub fn synthesize(
    entity: &EntityDef,
    options: &TrackingOptions,
    engine: StorageEngine,
) -> HistoricalSchema {
    let fields = fields_included(entity, &options.excluded_fields)
        .into_iter()
        .map(|f| project(f, &entity.table, engine))
        .collect();

    let verbose_name = options
        .verbose_name
        .clone()
        .unwrap_or_else(|| format!("historical {}", entity.verbose_name));
    let table = options
        .table_name
        .clone()
        .unwrap_or_else(|| format!("historical_{}", entity.table));

    HistoricalSchema {
        name: format!("Historical{}", entity.name),
        namespace: entity.namespace.clone(),
        table,
        verbose_name,
        bases: options.bases.clone(),
        fields,
        bookkeeping: bookkeeping_fields(options),
        ordering: vec!["-history_date".to_string(), "-history_id".to_string()],
        latest_by: "history_date".to_string(),
        excluded_fields: options.excluded_fields.clone(),
    }
}

/// One captured change, immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    /// Identity assigned by the history store, distinct from the
    /// original's identity
    pub history_id: u64,
    /// Storage table of the tracked type this row belongs to
    pub table: String,
    pub history_date: DateTime<Utc>,
    pub history_user: Option<Value>,
    pub history_change_reason: Option<String>,
    pub history_type: HistoryType,
    /// Snapshot of the included fields, keyed by attribute name
    pub fields: BTreeMap<String, Value>,
    pub checksum: Checksum,
}

impl HistoryRow {
    /// Verify the snapshot against its stored checksum
    pub fn verify_checksum(&self) -> bool {
        self.checksum.verify_snapshot(&self.fields)
    }
}

impl fmt::Display for HistoryRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} as of {}",
            self.table,
            self.history_type.label(),
            self.history_date
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;

    fn poll() -> EntityDef {
        EntityDef::new("polls", "Poll", "polls")
            .with_field(FieldDef::auto("id"))
            .with_field(FieldDef::char("question", 200))
            .with_field(FieldDef::datetime("pub_date"))
            .with_field(FieldDef::char("secret", 50))
    }

    #[test]
    fn test_synthesize_adds_bookkeeping_fields() {
        let schema = synthesize(&poll(), &TrackingOptions::default(), StorageEngine::Relational);
        let names: Vec<_> = schema.bookkeeping.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "history_id",
                "history_date",
                "history_change_reason",
                "history_user",
                "history_type",
            ]
        );
        // Only the synthetic identity is a primary key.
        let pks: Vec<_> = schema.all_fields().filter(|f| f.primary_key).collect();
        assert_eq!(pks.len(), 1);
        assert_eq!(pks[0].name, "history_id");
    }

    #[test]
    fn test_synthesize_names_and_ordering() {
        let schema = synthesize(&poll(), &TrackingOptions::default(), StorageEngine::Relational);
        assert_eq!(schema.name, "HistoricalPoll");
        assert_eq!(schema.namespace, "polls");
        assert_eq!(schema.table, "historical_polls");
        assert_eq!(schema.verbose_name, "historical poll");
        assert_eq!(schema.ordering, vec!["-history_date", "-history_id"]);
        assert_eq!(schema.latest_by, "history_date");
    }

    #[test]
    fn test_synthesize_overrides() {
        let options = TrackingOptions::new()
            .with_verbose_name("poll archive")
            .with_table_name("poll_log")
            .with_base("AuditMixin");
        let schema = synthesize(&poll(), &options, StorageEngine::Relational);
        assert_eq!(schema.verbose_name, "poll archive");
        assert_eq!(schema.table, "poll_log");
        assert_eq!(schema.bases, vec!["AuditMixin"]);
    }

    #[test]
    fn test_synthesize_excludes_fields() {
        let options = TrackingOptions::new().with_excluded_field("secret");
        let schema = synthesize(&poll(), &options, StorageEngine::Relational);
        assert!(schema.fields.iter().all(|f| f.name != "secret"));
        assert_eq!(schema.excluded_fields, vec!["secret"]);
    }

    #[test]
    fn test_history_user_field_shape() {
        let options = TrackingOptions::new().with_user_related_name("poll_edits");
        let schema = synthesize(&poll(), &options, StorageEngine::Relational);
        let user = schema
            .bookkeeping
            .iter()
            .find(|f| f.name == "history_user")
            .unwrap();
        assert!(user.nullable);
        let FieldKind::ForeignKey(fk) = &user.kind else {
            panic!("expected foreign key");
        };
        assert_eq!(fk.on_delete, OnDelete::SetNull);
        assert_eq!(fk.related_name.as_deref(), Some("poll_edits"));
    }

    #[test]
    fn test_history_type_codes() {
        assert_eq!(HistoryType::Created.code(), '+');
        assert_eq!(HistoryType::Changed.code(), '~');
        assert_eq!(HistoryType::Deleted.code(), '-');
        assert_eq!(HistoryType::Drafted.code(), '#');
        assert_eq!(HistoryType::from_code('~'), Some(HistoryType::Changed));
        assert_eq!(HistoryType::from_code('?'), None);
    }

    #[test]
    fn test_history_type_serde_codes() {
        assert_eq!(serde_json::to_string(&HistoryType::Created).unwrap(), "\"+\"");
        let parsed: HistoryType = serde_json::from_str("\"#\"").unwrap();
        assert_eq!(parsed, HistoryType::Drafted);
    }
}
