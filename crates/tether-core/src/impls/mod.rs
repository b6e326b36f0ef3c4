//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryStore**: 条件付き書き込みの契約をすべて満たすインメモリテーブル
//! - **StoreSequence**: Store 上のカウンタを使った採番
//!
//! 本番用のストア実装は別クレートに置く想定。

pub mod memory_store;
pub mod store_sequence;

pub use self::memory_store::InMemoryStore;
pub use self::store_sequence::StoreSequence;
