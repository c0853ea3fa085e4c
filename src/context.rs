//! Per-unit-of-work acting-user context
//!
//! Instead of an implicit thread-local, the acting user travels in an
//! explicit `ActingContext` handed to every capture call. The embedding
//! middleware binds the current user before mutations run and clears it
//! when the unit of work ends; concurrent units of work each carry their
//! own context.

use serde_json::Value;

/// The user bound to a unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct AmbientUser {
    /// User identity, as stored on history rows
    pub id: Value,
    pub authenticated: bool,
}

impl AmbientUser {
    /// An authenticated user
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            authenticated: true,
        }
    }

    /// An anonymous (unauthenticated) user; resolves to no acting user
    pub fn anonymous(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            authenticated: false,
        }
    }
}

/// Acting-user binding for one unit of work
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActingContext {
    user: Option<AmbientUser>,
}

impl ActingContext {
    /// A context with no user bound
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A context with a user bound
    pub fn with_user(user: AmbientUser) -> Self {
        Self { user: Some(user) }
    }

    /// Bind the acting user for this unit of work
    pub fn bind(&mut self, user: AmbientUser) {
        self.user = Some(user);
    }

    /// Clear the binding when the unit of work ends
    pub fn clear(&mut self) {
        self.user = None;
    }

    /// Resolve the acting user
    ///
    /// Evaluated at lookup time: an absent binding or an unauthenticated
    /// user both resolve to `None`, never to an error.
    pub fn acting_user(&self) -> Option<&Value> {
        match &self.user {
            Some(user) if user.authenticated => Some(&user.id),
            _ => None,
        }
    }
}
