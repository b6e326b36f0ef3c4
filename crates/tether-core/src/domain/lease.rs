use serde::{Deserialize, Serialize};

use super::LeaseId;

/// Persisted lease row. One per live participant process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub lease_id: LeaseId,
    pub node_identity: String,
    pub version: String,
    /// Incremented on every successful renewal.
    pub heartbeat: i64,
}

impl LeaseRecord {
    pub fn new(lease_id: LeaseId, node_identity: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            lease_id,
            node_identity: node_identity.into(),
            version: version.into(),
            heartbeat: 1,
        }
    }
}
