//! Tracked entity definitions and record instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::field::FieldDef;

/// Reference to the join entity backing a many-to-many relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThroughRef {
    /// Join entity is already loaded
    Resolved(Box<EntityDef>),
    /// Join entity declared by identifier, resolved once it finalizes
    Deferred { namespace: String, name: String },
}

/// A many-to-many relation declared on an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    /// Storage table of the related type
    pub target: String,
    pub through: ThroughRef,
}

impl RelationDef {
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        through: ThroughRef,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            through,
        }
    }
}

/// Definition of a tracked entity type
///
/// Mirrors what the mapper knows about a record type: its namespace,
/// storage table, fields and many-to-many relations. Immutable once
/// registered for tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Namespace (application label) the type lives in
    pub namespace: String,
    /// Type name, e.g. "Poll"
    pub name: String,
    /// Storage table name
    pub table: String,
    /// Human-readable display name
    pub verbose_name: String,
    /// Names of base types this type inherits from
    pub bases: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    /// Create a new entity definition
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let verbose_name = name.to_lowercase();
        Self {
            namespace: namespace.into(),
            name,
            table: table.into(),
            verbose_name,
            bases: Vec::new(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_verbose_name(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = verbose_name.into();
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a many-to-many relation by name
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// The primary-key field, if one is declared
    pub fn pk_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Registry key: (namespace, type name)
    pub fn key(&self) -> (&str, &str) {
        (&self.namespace, &self.name)
    }
}

/// An in-memory instance of a tracked type
///
/// Values are keyed by storage attribute name (`attname`). The remaining
/// fields are transient per-save escape hatches; none of them are ever
/// captured into a snapshot or persisted on the original type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub table: String,
    pub values: BTreeMap<String, Value>,
    /// Suppress the history row for the next save (updates only; a create
    /// always records its initial row)
    #[serde(skip)]
    pub skip_history: bool,
    /// Override for the captured timestamp
    #[serde(skip)]
    pub history_date: Option<DateTime<Utc>>,
    /// Override for the acting user
    #[serde(skip)]
    pub history_user: Option<Value>,
    /// Free-text annotation carried onto the next history row
    #[serde(skip)]
    pub change_reason: Option<String>,
}

impl Record {
    /// Create an empty record for a storage table
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Mark the next save as history-free
    pub fn without_history(mut self) -> Self {
        self.skip_history = true;
        self
    }

    pub fn with_history_date(mut self, date: DateTime<Utc>) -> Self {
        self.history_date = Some(date);
        self
    }

    pub fn with_history_user(mut self, user: impl Into<Value>) -> Self {
        self.history_user = Some(user.into());
        self
    }

    pub fn with_change_reason(mut self, reason: impl Into<String>) -> Self {
        self.change_reason = Some(reason.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_lookup() {
        let entity = EntityDef::new("polls", "Poll", "polls")
            .with_field(FieldDef::auto("id"))
            .with_field(FieldDef::char("question", 200));
        assert!(entity.field("question").is_some());
        assert!(entity.field("missing").is_none());
        assert_eq!(entity.pk_field().map(|f| f.name.as_str()), Some("id"));
        assert_eq!(entity.verbose_name, "poll");
    }

    #[test]
    fn test_record_values() {
        let mut record = Record::new("polls").with_value("id", 1);
        record.set("question", "what?");
        assert_eq!(record.get("id"), Some(&json!(1)));
        assert_eq!(record.get("question"), Some(&json!("what?")));
    }

    #[test]
    fn test_transient_flags_not_serialized() {
        let record = Record::new("polls")
            .with_value("id", 1)
            .without_history()
            .with_change_reason("tweak");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("skip_history").is_none());
        assert!(json.get("change_reason").is_none());
    }
}
