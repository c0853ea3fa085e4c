//! History tracking: registration, change capture and relationship events
//!
//! `HistoryTracker` is the process-wide registry of tracked types plus the
//! typed event surface the persistence layer calls on every mutation. All
//! capture runs synchronously in the unit of work that triggered it, so a
//! storage failure while appending the history row aborts that unit of
//! work together with the original mutation.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, trace};

use crate::checksum::Checksum;
use crate::context::ActingContext;
use crate::entity::{EntityDef, Record, ThroughRef};
use crate::error::{HistoryError, Result};
use crate::field::{FieldKind, RelationTarget, StorageEngine};
use crate::history::{fields_included, synthesize, HistoricalSchema, HistoryRow, HistoryType};
use crate::options::TrackingOptions;
use crate::store::{HistoryStore, SourceRows};

/// Relationship event kinds delivered by the mapper
///
/// `Remove` and `Clear` must be delivered while the affected join rows are
/// still present in the live source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationAction {
    Add,
    Remove,
    Clear,
}

struct TrackedEntry {
    entity: EntityDef,
    schema: HistoricalSchema,
    options: TrackingOptions,
}

/// Registry of tracked types and capture entry point
///
/// Registration (`track`, `entity_finalized`) runs single-threaded during
/// process initialization, before any lifecycle event fires.
pub struct HistoryTracker {
    engine: StorageEngine,
    store: Box<dyn HistoryStore>,
    source: Box<dyn SourceRows>,
    tracked: HashMap<String, TrackedEntry>,
    /// Join types declared by identifier before they were loadable
    pending: Vec<(String, String)>,
    /// Declarations that propagate to subclasses: (base name, options)
    inheritable: Vec<(String, TrackingOptions)>,
}

impl HistoryTracker {
    /// Create a tracker over a history store and a live-row source
    pub fn new(
        store: impl HistoryStore + 'static,
        source: impl SourceRows + 'static,
    ) -> Self {
        Self {
            engine: StorageEngine::default(),
            store: Box::new(store),
            source: Box::new(source),
            tracked: HashMap::new(),
            pending: Vec::new(),
            inheritable: Vec::new(),
        }
    }

    pub fn with_engine(mut self, engine: StorageEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Opt a type into history tracking.
    ///
    /// Synthesizes the historical type, registers it under the tracked
    /// table and validates the configured many-to-many relations. Tracking
    /// the same table twice is a configuration error.
    pub fn track(&mut self, entity: EntityDef, options: TrackingOptions) -> Result<()> {
        if let Some(existing) = self.tracked.get(&entity.table) {
            return Err(HistoryError::MultipleRegistration {
                namespace: entity.namespace,
                name: entity.name,
                accessor: existing.options.accessor.clone(),
            });
        }

        let mut joins_to_track = Vec::new();
        for name in &options.m2m_fields {
            let Some(relation) = entity.relation(name) else {
                return Err(if entity.field(name).is_some() {
                    HistoryError::NotManyToMany {
                        entity: entity.name.clone(),
                        field: name.clone(),
                    }
                } else {
                    HistoryError::UnknownField {
                        entity: entity.name.clone(),
                        field: name.clone(),
                    }
                });
            };
            match &relation.through {
                ThroughRef::Resolved(through) => {
                    if !self.tracked.contains_key(&through.table)
                        && !joins_to_track
                            .iter()
                            .any(|j: &EntityDef| j.table == through.table)
                    {
                        joins_to_track.push((**through).clone());
                    }
                }
                ThroughRef::Deferred { namespace, name } => {
                    let key = (namespace.clone(), name.clone());
                    if !self.pending.contains(&key) {
                        debug!(
                            namespace = %key.0,
                            name = %key.1,
                            "deferring registration of join type"
                        );
                        self.pending.push(key);
                    }
                }
            }
        }
        for through in joins_to_track {
            self.track(through, TrackingOptions::default())?;
        }

        let schema = synthesize(&entity, &options, self.engine);
        info!(
            table = %entity.table,
            history_table = %schema.table,
            accessor = %options.accessor,
            "history tracking enabled"
        );
        if options.inherit {
            self.inheritable
                .push((entity.name.clone(), Self::propagated_options(&options)));
        }
        self.tracked.insert(
            entity.table.clone(),
            TrackedEntry {
                entity,
                schema,
                options,
            },
        );
        Ok(())
    }

    /// Notify the tracker that a type has finished loading.
    ///
    /// Resolves a matching pending join registration, and applies
    /// inheritable declarations when the type lists a tracked base.
    pub fn entity_finalized(&mut self, entity: &EntityDef) -> Result<()> {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|(ns, name)| ns == &entity.namespace && name == &entity.name)
        {
            self.pending.remove(pos);
            if !self.tracked.contains_key(&entity.table) {
                debug!(table = %entity.table, "resolving deferred join registration");
                self.track(entity.clone(), TrackingOptions::default())?;
            }
            return Ok(());
        }

        let inherited = self
            .inheritable
            .iter()
            .find(|(base, _)| entity.bases.contains(base))
            .map(|(_, options)| options.clone());
        if let Some(options) = inherited {
            self.track(entity.clone(), options)?;
        }
        Ok(())
    }

    /// Per-type overrides must not leak onto subclasses.
    fn propagated_options(options: &TrackingOptions) -> TrackingOptions {
        let mut propagated = options.clone();
        propagated.table_name = None;
        propagated.verbose_name = None;
        propagated
    }

    pub fn is_tracked(&self, table: &str) -> bool {
        self.tracked.contains_key(table)
    }

    /// Storage tables currently registered for tracking
    pub fn tracked_tables(&self) -> Vec<&str> {
        let mut tables: Vec<_> = self.tracked.keys().map(String::as_str).collect();
        tables.sort_unstable();
        tables
    }

    pub fn entity(&self, table: &str) -> Option<&EntityDef> {
        self.tracked.get(table).map(|e| &e.entity)
    }

    pub fn schema(&self, table: &str) -> Option<&HistoricalSchema> {
        self.tracked.get(table).map(|e| &e.schema)
    }

    /// Accessor name the history manager is installed under
    pub fn accessor_for(&self, table: &str) -> Option<&str> {
        self.tracked.get(table).map(|e| e.options.accessor.as_str())
    }

    /// Join registrations still waiting for their type to load
    pub fn pending_registrations(&self) -> &[(String, String)] {
        &self.pending
    }

    /// Capture a post-save notification.
    ///
    /// Raw/bulk loads never produce history. The per-instance skip flag
    /// suppresses the row for updates only: a freshly created record
    /// records its initial row even when the flag is set, so every
    /// instance has an initial snapshot. Saves of untracked tables are
    /// ignored.
    pub fn record_saved(
        &self,
        record: &Record,
        created: bool,
        raw: bool,
        ctx: &ActingContext,
    ) -> Result<Option<HistoryRow>> {
        let Some(entry) = self.tracked.get(&record.table) else {
            trace!(table = %record.table, "save on untracked table ignored");
            return Ok(None);
        };
        if raw {
            return Ok(None);
        }
        if !created && record.skip_history {
            return Ok(None);
        }
        let history_type = if created {
            HistoryType::Created
        } else {
            HistoryType::Changed
        };
        self.capture(entry, record, history_type, ctx).map(Some)
    }

    /// Capture a post-delete notification. Removal is always recorded.
    pub fn record_deleted(
        &self,
        record: &Record,
        ctx: &ActingContext,
    ) -> Result<Option<HistoryRow>> {
        let Some(entry) = self.tracked.get(&record.table) else {
            trace!(table = %record.table, "delete on untracked table ignored");
            return Ok(None);
        };
        self.capture(entry, record, HistoryType::Deleted, ctx).map(Some)
    }

    /// Force a Drafted history row without persisting the instance
    pub fn save_as_draft(&self, record: &Record, ctx: &ActingContext) -> Result<HistoryRow> {
        let entry = self
            .tracked
            .get(&record.table)
            .ok_or_else(|| HistoryError::NotTracked(record.table.clone()))?;
        self.capture(entry, record, HistoryType::Drafted, ctx)
    }

    /// Capture a relationship add/remove/clear event on a tracked join
    /// table.
    ///
    /// `instance` is the record the relation was mutated through and
    /// `target_table` the related type's storage table; the affected join
    /// rows are looked up live and restricted to `target_keys` when the
    /// event supplies them. Add emits Created rows unless the instance
    /// carries the skip flag; Remove and Clear always emit Deleted rows.
    pub fn relation_changed(
        &self,
        instance: &Record,
        through_table: &str,
        target_table: &str,
        action: RelationAction,
        target_keys: Option<&[Value]>,
        ctx: &ActingContext,
    ) -> Result<Vec<HistoryRow>> {
        let Some(entry) = self.tracked.get(through_table) else {
            trace!(table = %through_table, "relation event on untracked join table ignored");
            return Ok(Vec::new());
        };

        let mut source_field = None;
        let mut target_field = None;
        for field in &entry.entity.fields {
            let FieldKind::ForeignKey(fk) = &field.kind else {
                continue;
            };
            let RelationTarget::Entity(fk_table) = &fk.target else {
                continue;
            };
            if fk_table == target_table && target_field.is_none() {
                target_field = Some(field);
            } else if fk_table == &instance.table && source_field.is_none() {
                source_field = Some(field);
            }
        }
        let (source_field, target_field) =
            source_field
                .zip(target_field)
                .ok_or_else(|| HistoryError::JoinResolution {
                    through: through_table.to_string(),
                })?;

        let owner = self
            .tracked
            .get(&instance.table)
            .ok_or_else(|| HistoryError::NotTracked(instance.table.clone()))?;
        let owner_pk_attname = owner
            .entity
            .pk_field()
            .ok_or_else(|| HistoryError::MissingPrimaryKey {
                entity: owner.entity.name.clone(),
            })?
            .attname();
        let owner_pk = instance
            .get(&owner_pk_attname)
            .cloned()
            .unwrap_or(Value::Null);

        let mut affected =
            self.source
                .filter(through_table, &source_field.attname(), &owner_pk)?;
        if let Some(keys) = target_keys {
            let target_attname = target_field.attname();
            affected.retain(|row| {
                row.get(&target_attname)
                    .map(|value| keys.contains(value))
                    .unwrap_or(false)
            });
        }

        let history_type = match action {
            RelationAction::Add => {
                if instance.skip_history {
                    return Ok(Vec::new());
                }
                HistoryType::Created
            }
            RelationAction::Remove | RelationAction::Clear => HistoryType::Deleted,
        };

        debug!(
            through = %through_table,
            affected = affected.len(),
            action = ?action,
            "relation change captured"
        );
        let mut rows = Vec::with_capacity(affected.len());
        for join_row in &affected {
            rows.push(self.capture(entry, join_row, history_type, ctx)?);
        }
        Ok(rows)
    }

    /// Query accessor scoped to one tracked type's history
    pub fn history(&self, table: &str) -> Result<HistoryHandle<'_>> {
        let entry = self
            .tracked
            .get(table)
            .ok_or_else(|| HistoryError::NotTracked(table.to_string()))?;
        Ok(HistoryHandle {
            entry,
            store: self.store.as_ref(),
            source: self.source.as_ref(),
        })
    }

    /// Build and append one history row from the instance's in-memory
    /// state.
    fn capture(
        &self,
        entry: &TrackedEntry,
        record: &Record,
        history_type: HistoryType,
        ctx: &ActingContext,
    ) -> Result<HistoryRow> {
        let mut fields = BTreeMap::new();
        for field in fields_included(&entry.entity, &entry.options.excluded_fields) {
            let attname = field.attname();
            let value = record.get(&attname).cloned().unwrap_or(Value::Null);
            fields.insert(attname, value);
        }

        let history_date = record.history_date.unwrap_or_else(chrono::Utc::now);
        let history_user = record
            .history_user
            .clone()
            .or_else(|| ctx.acting_user().cloned());
        let checksum = Checksum::from_snapshot(&fields);

        let row = HistoryRow {
            history_id: 0,
            table: entry.entity.table.clone(),
            history_date,
            history_user,
            history_change_reason: record.change_reason.clone(),
            history_type,
            fields,
            checksum,
        };
        let history_id = self.store.append(row.clone())?;
        debug!(
            table = %entry.entity.table,
            history_id,
            history_type = %history_type.code(),
            "history row recorded"
        );
        Ok(HistoryRow { history_id, ..row })
    }
}

/// Query manager scoped to one tracked type, discoverable under the
/// configured accessor name
pub struct HistoryHandle<'a> {
    entry: &'a TrackedEntry,
    store: &'a dyn HistoryStore,
    source: &'a dyn SourceRows,
}

impl<'a> HistoryHandle<'a> {
    /// The accessor name this handle is registered under
    pub fn accessor(&self) -> &str {
        &self.entry.options.accessor
    }

    pub fn schema(&self) -> &HistoricalSchema {
        &self.entry.schema
    }

    /// All history rows for the tracked type, newest first
    pub fn all(&self) -> Result<Vec<HistoryRow>> {
        self.store.all(&self.entry.entity.table)
    }

    /// History rows for one instance, newest first
    pub fn for_instance(&self, pk: &Value) -> Result<Vec<HistoryRow>> {
        let pk_attname = self.pk_attname()?;
        self.store
            .for_instance(&self.entry.entity.table, &pk_attname, pk)
    }

    /// The most recent history row for one instance
    pub fn most_recent(&self, pk: &Value) -> Result<Option<HistoryRow>> {
        Ok(self.for_instance(pk)?.into_iter().next())
    }

    pub fn count(&self) -> Result<usize> {
        self.store.count(&self.entry.entity.table)
    }

    /// Rebuild a transient instance of the original type from a history
    /// row.
    ///
    /// Excluded fields are not part of the snapshot, so their values are
    /// fetched from the current live record by primary key; when that
    /// record no longer exists the lookup error propagates to the caller.
    pub fn reconstruct(&self, row: &HistoryRow) -> Result<Record> {
        let entity = &self.entry.entity;
        let mut record = Record::new(entity.table.clone());
        record.values = row.fields.clone();

        let excluded = &self.entry.options.excluded_fields;
        if !excluded.is_empty() {
            let pk_attname = self.pk_attname()?;
            let pk = row.fields.get(&pk_attname).cloned().unwrap_or(Value::Null);
            let live = self
                .source
                .get(&entity.table, &pk_attname, &pk)?
                .ok_or_else(|| HistoryError::LiveRecordMissing {
                    table: entity.table.clone(),
                    pk: pk.clone(),
                })?;
            for name in excluded {
                let attname = entity
                    .field(name)
                    .map(|f| f.attname())
                    .unwrap_or_else(|| name.clone());
                let value = live.get(&attname).cloned().unwrap_or(Value::Null);
                record.values.insert(attname, value);
            }
        }
        Ok(record)
    }

    fn pk_attname(&self) -> Result<String> {
        Ok(self
            .entry
            .entity
            .pk_field()
            .ok_or_else(|| HistoryError::MissingPrimaryKey {
                entity: self.entry.entity.name.clone(),
            })?
            .attname())
    }
}
