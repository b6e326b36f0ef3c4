//! Store port - 共有キーバリューテーブルの抽象化
//!
//! 参加者どうしは共有メモリを持たない。調停はすべてこの trait の
//! 条件付き書き込み（compare-and-swap）で行う。
//!
//! # 契約
//! - `update` は条件を満たすときだけ変更を適用し、適用後のアイテムを返す。
//!   アイテムが存在しない場合は空のアイテムに対して条件を評価し、
//!   条件を満たせば新規作成する（キー項目は自動で入る）。
//! - 条件を満たさない場合は何も変更せず `StoreError::ConditionFailed`。
//! - `query` はソートキー順に返し、`next` が `Some` なら続きがある。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A stored record: a JSON object keyed by camelCase field names.
pub type Item = serde_json::Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("condition failed")]
    ConditionFailed,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt item: {0}")]
    Corrupt(String),
}

/// A secondary index: items with `hash_field == value`, ordered by `sort_fields`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub hash_field: &'static str,
    pub sort_fields: &'static [&'static str],
}

const TASK_INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "owner",
        hash_field: "ownerLeaseRef",
        sort_fields: &["taskId"],
    },
    IndexSpec {
        name: "entity",
        hash_field: "entityType",
        sort_fields: &["entityId", "taskId"],
    },
];

const LOCK_INDEXES: &[IndexSpec] = &[IndexSpec {
    name: "owner",
    hash_field: "ownerLeaseRef",
    sort_fields: &["lockId"],
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Tasks,
    Locks,
    Leases,
    Sequences,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Locks => "locks",
            Self::Leases => "leases",
            Self::Sequences => "sequences",
        }
    }

    pub fn hash_field(self) -> &'static str {
        match self {
            Self::Tasks => "taskId",
            Self::Locks => "lockId",
            Self::Leases => "leaseId",
            Self::Sequences => "name",
        }
    }

    pub fn range_field(self) -> Option<&'static str> {
        match self {
            Self::Locks => Some("rowId"),
            _ => None,
        }
    }

    pub fn indexes(self) -> &'static [IndexSpec] {
        match self {
            Self::Tasks => TASK_INDEXES,
            Self::Locks => LOCK_INDEXES,
            Self::Leases | Self::Sequences => &[],
        }
    }

    pub fn index(self, name: &str) -> Option<&'static IndexSpec> {
        self.indexes().iter().find(|spec| spec.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub hash: String,
    pub range: Option<String>,
}

impl Key {
    pub fn hash(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: None,
        }
    }

    pub fn compound(hash: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: Some(range.into()),
        }
    }

    /// Write the key fields into `item`.
    pub fn stamp(&self, table: Table, item: &mut Item) {
        item.insert(table.hash_field().to_string(), Value::String(self.hash.clone()));
        if let (Some(field), Some(range)) = (table.range_field(), &self.range) {
            item.insert(field.to_string(), Value::String(range.clone()));
        }
    }
}

/// Predicate on the stored item. A missing item is evaluated as an empty one.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(String, Value),
    Exists(String),
    NotExists(String),
    /// Holds if any inner condition holds.
    AnyOf(Vec<Condition>),
}

impl Condition {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals(field.into(), value.into())
    }

    pub fn holds(&self, item: Option<&Item>) -> bool {
        let get = |field: &str| item.and_then(|i| i.get(field));
        match self {
            Self::Equals(field, expected) => get(field) == Some(expected),
            Self::Exists(field) => get(field).is_some(),
            Self::NotExists(field) => get(field).is_none(),
            Self::AnyOf(any) => any.iter().any(|c| c.holds(item)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set(String, Value),
    Remove(String),
    /// Adds to an integer field; a missing field counts as zero.
    Increment(String, i64),
}

impl Mutation {
    pub fn apply(&self, item: &mut Item) -> Result<(), StoreError> {
        match self {
            Self::Set(field, value) => {
                item.insert(field.clone(), value.clone());
            }
            Self::Remove(field) => {
                item.remove(field);
            }
            Self::Increment(field, by) => {
                let current = match item.get(field) {
                    None => 0,
                    Some(value) => value.as_i64().ok_or_else(|| {
                        StoreError::Corrupt(format!("field {field} is not an integer: {value}"))
                    })?,
                };
                item.insert(field.clone(), Value::from(current.saturating_add(*by)));
            }
        }
        Ok(())
    }
}

/// A conditional update: all `conditions` must hold, then `mutations` apply in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub conditions: Vec<Condition>,
    pub mutations: Vec<Mutation>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn when_equals(self, field: &str, value: impl Into<Value>) -> Self {
        self.when(Condition::equals(field, value))
    }

    pub fn when_exists(self, field: &str) -> Self {
        self.when(Condition::Exists(field.to_string()))
    }

    pub fn when_absent(self, field: &str) -> Self {
        self.when(Condition::NotExists(field.to_string()))
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.mutations.push(Mutation::Set(field.to_string(), value.into()));
        self
    }

    /// `Set` when `Some`, `Remove` when `None`.
    pub fn set_opt(self, field: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.set(field, v),
            None => self.remove(field),
        }
    }

    pub fn remove(mut self, field: &str) -> Self {
        self.mutations.push(Mutation::Remove(field.to_string()));
        self
    }

    pub fn increment(mut self, field: &str, by: i64) -> Self {
        self.mutations.push(Mutation::Increment(field.to_string(), by));
        self
    }

    pub fn conditions_hold(&self, item: Option<&Item>) -> bool {
        self.conditions.iter().all(|c| c.holds(item))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKey {
    /// All items sharing a hash key, ordered by range key.
    Partition(String),
    /// Items of a secondary index with the given hash value.
    Index { name: &'static str, value: String },
    /// Every item in the table, ordered by primary key.
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: Table,
    pub key: QueryKey,
    /// Exclusive start: the `next` marker of the previous page.
    pub after: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub next: Option<String>,
}

/// Store は共有テーブルへのアクセスを提供
///
/// # Thread Safety
/// - `Send + Sync` を要求（全参加者が `Arc<dyn Store>` で共有する）
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, table: Table, key: &Key) -> Result<Option<Item>, StoreError>;

    /// Unconditional insert-or-replace.
    async fn put(&self, table: Table, key: &Key, item: Item) -> Result<(), StoreError>;

    /// Delete when every condition holds (an empty slice always holds).
    async fn delete(&self, table: Table, key: &Key, conditions: &[Condition]) -> Result<(), StoreError>;

    async fn update(&self, table: Table, key: &Key, update: &Update) -> Result<Item, StoreError>;

    async fn query(&self, query: &Query) -> Result<Page, StoreError>;
}
