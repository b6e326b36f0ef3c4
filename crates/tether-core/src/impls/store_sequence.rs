//! StoreSequence - 共有ストア上のカウンタによる採番
//!
//! `sequences` テーブルの `value` を条件なしの increment で進める。
//! increment は原子的なので、同じストアを共有する全参加者で一意になる。

use async_trait::async_trait;
use std::sync::Arc;

use crate::ports::{Key, Sequence, Store, StoreError, Table, Update};

const VALUE_FIELD: &str = "value";

pub struct StoreSequence {
    store: Arc<dyn Store>,
}

impl StoreSequence {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Sequence for StoreSequence {
    async fn next(&self, name: &str) -> Result<u64, StoreError> {
        let item = self
            .store
            .update(Table::Sequences, &Key::hash(name), &Update::new().increment(VALUE_FIELD, 1))
            .await?;
        item.get(VALUE_FIELD)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| StoreError::Corrupt(format!("sequence {name} has no numeric value")))
    }
}
