//! Sequence port - 単調増加する一意 ID の採番
//!
//! TaskId は並び順（FIFO の tie-break）としても使うため、ULID ではなく
//! 共有ストア上のカウンタから採番する。

use async_trait::async_trait;

use crate::ports::StoreError;

/// Sequence は名前ごとに一意な値を返す
///
/// - 同じ `name` に対して同じ値を二度返さない
/// - 同じ呼び出し元から見て値は厳密に増加する
#[async_trait]
pub trait Sequence: Send + Sync {
    async fn next(&self, name: &str) -> Result<u64, StoreError>;
}
