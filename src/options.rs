//! Declaration-time configuration for history tracking
//!
//! `TrackingOptions` is the whole opt-in surface: display name, base mixins
//! for the historical type, acting-user reverse accessor, explicit table
//! name, inheritance propagation, excluded fields and tracked many-to-many
//! relations.

/// Options attached when a type is opted into history tracking
#[derive(Debug, Clone)]
pub struct TrackingOptions {
    /// Display name override for the historical type
    pub verbose_name: Option<String>,
    /// Base type names mixed into the historical type
    pub bases: Vec<String>,
    /// Reverse accessor name on the acting-user side
    pub user_related_name: Option<String>,
    /// Storage table holding acting users
    pub user_table: String,
    /// Explicit storage table for history rows; the mapper's default
    /// naming applies when unset
    pub table_name: Option<String>,
    /// Also track subclass types when they finalize
    pub inherit: bool,
    /// Field names dropped from every historical snapshot
    pub excluded_fields: Vec<String>,
    /// Many-to-many relation names to track alongside the type
    pub m2m_fields: Vec<String>,
    /// Name the history query accessor is installed under
    pub accessor: String,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            verbose_name: None,
            bases: Vec::new(),
            user_related_name: None,
            user_table: "auth_user".to_string(),
            table_name: None,
            inherit: false,
            excluded_fields: Vec::new(),
            m2m_fields: Vec::new(),
            accessor: "history".to_string(),
        }
    }
}

impl TrackingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbose_name(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = Some(verbose_name.into());
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn with_user_related_name(mut self, name: impl Into<String>) -> Self {
        self.user_related_name = Some(name.into());
        self
    }

    pub fn with_user_table(mut self, table: impl Into<String>) -> Self {
        self.user_table = table.into();
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_inherit(mut self) -> Self {
        self.inherit = true;
        self
    }

    pub fn with_excluded_field(mut self, field: impl Into<String>) -> Self {
        self.excluded_fields.push(field.into());
        self
    }

    pub fn with_m2m_field(mut self, field: impl Into<String>) -> Self {
        self.m2m_fields.push(field.into());
        self
    }

    pub fn with_accessor(mut self, accessor: impl Into<String>) -> Self {
        self.accessor = accessor.into();
        self
    }
}
