//! Field definitions and the projection applied when a tracked type's
//! fields are copied into its historical counterpart.

use serde::{Deserialize, Serialize};

/// Storage engine family the schemas will live on
///
/// Document engines lack a native auto-increment, so projected identity
/// fields become text there instead of integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageEngine {
    #[default]
    Relational,
    Document,
}

/// Delete behavior for a foreign-key reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    Cascade,
    SetNull,
    DoNothing,
}

/// Target of a foreign-key reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationTarget {
    /// A concrete entity, identified by its storage table
    Entity(String),
    /// The owning entity itself, resolved during projection
    SelfRef,
}

/// Foreign-key details carried by `FieldKind::ForeignKey`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub target: RelationTarget,
    /// Target field override (defaults to the target's primary key)
    pub to_field: Option<String>,
    /// Column name override
    pub db_column: Option<String>,
    /// Whether the database enforces the reference
    pub db_constraint: bool,
    pub one_to_one: bool,
    pub on_delete: OnDelete,
    /// Reverse accessor name on the target type
    pub related_name: Option<String>,
}

/// Kind of a field on an entity definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Auto-incrementing identity
    Auto,
    Integer,
    Float,
    Boolean,
    Text,
    Char { max_length: u32 },
    DateTime { auto_now: bool, auto_now_add: bool },
    /// File reference; only the path is stored
    File,
    /// Ordering proxy maintained by the mapper
    OrderProxy,
    ForeignKey(ForeignKeyDef),
}

/// A single field on an entity definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub primary_key: bool,
    pub unique: bool,
    pub nullable: bool,
    pub indexed: bool,
    /// Whether the field participates in serialized snapshots
    pub serialize: bool,
}

impl FieldDef {
    /// Create a new field of the given kind
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            primary_key: false,
            unique: false,
            nullable: false,
            indexed: false,
            serialize: true,
        }
    }

    /// Auto-incrementing primary-key field
    pub fn auto(name: impl Into<String>) -> Self {
        let mut field = Self::new(name, FieldKind::Auto);
        field.primary_key = true;
        field
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn char(name: impl Into<String>, max_length: u32) -> Self {
        Self::new(name, FieldKind::Char { max_length })
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::DateTime {
                auto_now: false,
                auto_now_add: false,
            },
        )
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::File)
    }

    /// Many-to-one reference to another entity's storage table
    pub fn foreign_key(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::ForeignKey(ForeignKeyDef {
                target: RelationTarget::Entity(target.into()),
                to_field: None,
                db_column: None,
                db_constraint: true,
                one_to_one: false,
                on_delete: OnDelete::Cascade,
                related_name: None,
            }),
        )
    }

    /// One-to-one reference to another entity's storage table
    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut field = Self::foreign_key(name, target);
        if let FieldKind::ForeignKey(fk) = &mut field.kind {
            fk.one_to_one = true;
        }
        field.unique = true;
        field
    }

    pub fn with_primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn with_auto_now(mut self) -> Self {
        if let FieldKind::DateTime { auto_now, .. } = &mut self.kind {
            *auto_now = true;
        }
        self
    }

    pub fn with_auto_now_add(mut self) -> Self {
        if let FieldKind::DateTime { auto_now_add, .. } = &mut self.kind {
            *auto_now_add = true;
        }
        self
    }

    pub fn with_on_delete(mut self, on_delete: OnDelete) -> Self {
        if let FieldKind::ForeignKey(fk) = &mut self.kind {
            fk.on_delete = on_delete;
        }
        self
    }

    pub fn with_related_name(mut self, related_name: impl Into<String>) -> Self {
        if let FieldKind::ForeignKey(fk) = &mut self.kind {
            fk.related_name = Some(related_name.into());
        }
        self
    }

    pub fn with_to_field(mut self, to_field: impl Into<String>) -> Self {
        if let FieldKind::ForeignKey(fk) = &mut self.kind {
            fk.to_field = Some(to_field.into());
        }
        self
    }

    pub fn with_db_column(mut self, db_column: impl Into<String>) -> Self {
        if let FieldKind::ForeignKey(fk) = &mut self.kind {
            fk.db_column = Some(db_column.into());
        }
        self
    }

    /// Storage attribute name: foreign keys store `<name>_id`, everything
    /// else stores under the field name itself.
    pub fn attname(&self) -> String {
        match self.kind {
            FieldKind::ForeignKey(_) => format!("{}_id", self.name),
            _ => self.name.clone(),
        }
    }
}

/// Project a tracked type's field into its historical counterpart.
///
/// The original definition is never mutated; `owner_table` is the storage
/// table of the containing type, used to resolve self-references.
pub fn project(field: &FieldDef, owner_table: &str, engine: StorageEngine) -> FieldDef {
    if let FieldKind::ForeignKey(fk) = &field.kind {
        // References can no longer be enforced: the referenced row may be
        // long gone by the time the snapshot is read.
        let target = match &fk.target {
            RelationTarget::SelfRef => RelationTarget::Entity(owner_table.to_string()),
            RelationTarget::Entity(table) => RelationTarget::Entity(table.clone()),
        };
        let mut projected = FieldDef::new(
            field.name.clone(),
            FieldKind::ForeignKey(ForeignKeyDef {
                target,
                to_field: fk.to_field.clone(),
                db_column: fk.db_column.clone(),
                db_constraint: false,
                one_to_one: false,
                on_delete: OnDelete::DoNothing,
                related_name: Some("+".to_string()),
            }),
        );
        projected.nullable = true;
        projected.indexed = true;
        return projected;
    }

    let mut projected = field.clone();
    match &mut projected.kind {
        FieldKind::OrderProxy => projected.kind = FieldKind::Integer,
        FieldKind::Auto => {
            // The historical type gets its own identity, so the original
            // one becomes a plain value.
            projected.kind = match engine {
                StorageEngine::Relational => FieldKind::Integer,
                StorageEngine::Document => FieldKind::Text,
            };
        }
        FieldKind::File => projected.kind = FieldKind::Text,
        FieldKind::DateTime { auto_now, auto_now_add } => {
            // History must capture the value as it stood, not overwrite it.
            *auto_now = false;
            *auto_now_add = false;
        }
        _ => {}
    }
    projected.name = projected.attname();
    if projected.primary_key || projected.unique {
        projected.primary_key = false;
        projected.unique = false;
        projected.indexed = true;
        projected.serialize = true;
    }
    projected
}
