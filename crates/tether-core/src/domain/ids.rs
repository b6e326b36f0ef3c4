//! Domain identifiers (strongly-typed IDs).
//!
//! - `TaskId`: `Sequence` から採番される u64。投入順に単調増加し、
//!   永続化時は 20 桁ゼロ埋めの文字列になる（辞書順 == 数値順）。
//! - `LeaseId`: ランダムな ULID。プロセスの生存期間中だけ一意であればよい。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Digits needed to render `u64::MAX`.
const SORTABLE_WIDTH: usize = 20;

/// Identifier of a task. Strictly increasing in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// Zero-padded form used as a store key and as a waiter row id.
    pub fn sortable(self) -> String {
        format!("{:0width$}", self.0, width = SORTABLE_WIDTH)
    }

    pub fn from_sortable(s: &str) -> Option<Self> {
        s.parse::<u64>().ok().map(Self)
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.sortable())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_sortable(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid task id: {raw:?}")))
    }
}

/// Identifier of one participant's lease.
///
/// Persisted as the bare ULID string; `Display` adds a `lease-` prefix for logs.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(Ulid);

impl LeaseId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Stored form (no prefix).
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl FromStr for LeaseId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("lease-").unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sortable_form_orders_like_numbers() {
        let ids = [TaskId::new(9), TaskId::new(10), TaskId::new(1_000_000)];
        let mut keys: Vec<String> = ids.iter().map(|id| id.sortable()).collect();
        keys.sort();

        assert_eq!(keys, ids.iter().map(|id| id.sortable()).collect::<Vec<_>>());
        assert_eq!(keys[0].len(), 20);
        assert_eq!(TaskId::new(u64::MAX).sortable().len(), 20);
    }

    #[test]
    fn task_id_is_stored_as_padded_string() {
        let id = TaskId::new(42);
        let value = serde_json::to_value(id).unwrap();

        assert_eq!(value, serde_json::json!("00000000000000000042"));
        assert_eq!(serde_json::from_value::<TaskId>(value).unwrap(), id);
        assert!(serde_json::from_value::<TaskId>(serde_json::json!("nope")).is_err());
        assert_eq!(id.to_string(), "task-42");
    }

    #[test]
    fn lease_ids_are_unique_and_parse_back() {
        let a = LeaseId::generate();
        let b = LeaseId::generate();
        assert_ne!(a, b);

        assert!(a.to_string().starts_with("lease-"));
        assert_eq!(a.to_string().parse::<LeaseId>().unwrap(), a);
        assert_eq!(a.key().parse::<LeaseId>().unwrap(), a);
        assert_eq!(serde_json::to_value(a).unwrap(), serde_json::json!(a.key()));
    }
}
