//! Checksum utilities for snapshot integrity verification

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// SHA256 checksum over a serialized field snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from a snapshot field map
    ///
    /// A `BTreeMap` serializes with sorted keys, so the same snapshot always
    /// hashes to the same digest regardless of insertion order.
    pub fn from_snapshot(fields: &BTreeMap<String, Value>) -> Self {
        let canonical = serde_json::to_string(fields).unwrap_or_default();
        Self::from_bytes(canonical.as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that a snapshot matches this checksum
    pub fn verify_snapshot(&self, fields: &BTreeMap<String, Value>) -> bool {
        let computed = Self::from_snapshot(fields);
        self.0 == computed.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}
