//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（共有テーブル、時計、採番）へのインターフェースを
//! 提供し、実装の詳細を隠蔽する。開発用の実装は `impls` にある。

pub mod clock;
pub mod sequence;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::sequence::Sequence;
pub use self::store::{
    Condition, IndexSpec, Item, Key, Mutation, Page, Query, QueryKey, Store, StoreError, Table,
    Update,
};
