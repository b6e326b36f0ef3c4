//! App - アプリケーション層
//!
//! repo / coordinator / lease を組み合わせてスケジューラを実装する。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: 参加者の構築とワイヤリング
//! - **TaskScheduler**: 投入・取消・照会とキュー監視
//! - **worker_loop**: 1 タスク分の状態遷移と poll sweep
//! - **reaper_loop**: 死んだ lease の検出と回収
//! - **graph**: prerequisite の循環検出

pub mod builder;
pub mod graph;
pub mod reaper_loop;
pub mod scheduler;
pub(crate) mod worker_loop;

#[cfg(test)]
mod scenarios;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::graph::DependencyGraph;
pub use self::reaper_loop::REAP_ENTITY_TYPE;
pub use self::scheduler::TaskScheduler;
