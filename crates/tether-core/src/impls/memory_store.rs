//! InMemoryStore - 開発・テスト用の共有テーブル
//!
//! 複数の `TaskScheduler`（= 模擬参加者）が同じ `Arc<InMemoryStore>` を共有すれば、
//! 本物の分散環境と同じ条件付き書き込みの競合が再現できる。
//!
//! # 実装詳細
//! - `HashMap<Table, BTreeMap<Key, Item>>` を 1 つの Mutex で保護
//! - ロック中に await しないので、tokio の Mutex は不要
//! - セカンダリインデックスは query 時に全件走査して組み立てる

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ports::{
    Condition, IndexSpec, Item, Key, Page, Query, QueryKey, Store, StoreError, Table, Update,
};

/// Separator between the parts of a composite sort key.
const SORT_SEP: char = '\u{1f}';

type Tables = HashMap<Table, BTreeMap<Key, Item>>;

#[derive(Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// テスト用: true の間はすべての操作が `Unavailable` で失敗する
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of items currently stored in `table`.
    pub fn len(&self, table: Table) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.get(&table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        self.tables
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("store mutex poisoned: {e}")))
    }
}

fn field_text(item: &Item, field: &str) -> String {
    match item.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn index_sort_key(spec: &IndexSpec, item: &Item) -> String {
    spec.sort_fields
        .iter()
        .map(|field| field_text(item, field))
        .collect::<Vec<_>>()
        .join(&SORT_SEP.to_string())
}

fn scan_sort_key(key: &Key) -> String {
    match &key.range {
        Some(range) => format!("{}{SORT_SEP}{range}", key.hash),
        None => key.hash.clone(),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, table: Table, key: &Key) -> Result<Option<Item>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.get(&table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn put(&self, table: Table, key: &Key, mut item: Item) -> Result<(), StoreError> {
        key.stamp(table, &mut item);
        let mut tables = self.lock()?;
        tables.entry(table).or_default().insert(key.clone(), item);
        Ok(())
    }

    async fn delete(&self, table: Table, key: &Key, conditions: &[Condition]) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let rows = tables.entry(table).or_default();
        if !conditions.iter().all(|c| c.holds(rows.get(key))) {
            return Err(StoreError::ConditionFailed);
        }
        rows.remove(key);
        Ok(())
    }

    async fn update(&self, table: Table, key: &Key, update: &Update) -> Result<Item, StoreError> {
        let mut tables = self.lock()?;
        let rows = tables.entry(table).or_default();
        let current = rows.get(key);
        if !update.conditions_hold(current) {
            return Err(StoreError::ConditionFailed);
        }

        // 失敗時に部分適用を残さないよう、コピーに適用してから差し替える
        let mut next = current.cloned().unwrap_or_default();
        for mutation in &update.mutations {
            mutation.apply(&mut next)?;
        }
        key.stamp(table, &mut next);
        rows.insert(key.clone(), next.clone());
        Ok(next)
    }

    async fn query(&self, query: &Query) -> Result<Page, StoreError> {
        let tables = self.lock()?;
        let Some(rows) = tables.get(&query.table) else {
            return Ok(Page::default());
        };

        let mut hits: Vec<(String, &Item)> = match &query.key {
            QueryKey::Partition(hash) => rows
                .iter()
                .filter(|(key, _)| key.hash == *hash)
                .map(|(key, item)| (key.range.clone().unwrap_or_default(), item))
                .collect(),
            QueryKey::Index { name, value } => {
                let spec = query.table.index(name).ok_or_else(|| {
                    StoreError::Corrupt(format!("table {} has no index {name}", query.table.name()))
                })?;
                rows.values()
                    .filter(|item| item.get(spec.hash_field).and_then(Value::as_str) == Some(value))
                    .map(|item| (index_sort_key(spec, item), item))
                    .collect()
            }
            QueryKey::Scan => rows.iter().map(|(key, item)| (scan_sort_key(key), item)).collect(),
        };
        hits.sort_by(|a, b| a.0.cmp(&b.0));

        let limit = query.limit.max(1);
        let mut remaining = hits
            .into_iter()
            .filter(|(sort_key, _)| query.after.as_ref().is_none_or(|after| sort_key > after));

        let mut page = Page::default();
        let mut last = None;
        for (sort_key, item) in remaining.by_ref().take(limit) {
            page.items.push(item.clone());
            last = Some(sort_key);
        }
        if remaining.next().is_some() {
            page.next = last;
        }
        Ok(page)
    }
}
