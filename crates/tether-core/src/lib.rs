//! tether-core
//!
//! Durable task scheduling shared by a cluster of participant processes.
//! Mutual exclusion comes from leases kept alive by heartbeats and from
//! locks stored next to the tasks in one shared table store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, lock, lease, page）
//! - **ports**: 抽象化レイヤー（Store, Sequence, Clock）
//! - **impls**: 開発・テスト用の実装（InMemoryStore, StoreSequence）
//! - **repo**: テーブルごとの条件付き読み書き
//! - **lease**: LeaseManager と LeaseHandle
//! - **coordinator**: ロックと prerequisite の取得・解放
//! - **handler**: entity type ごとの TaskHandler と登録簿
//! - **app**: SchedulerBuilder, TaskScheduler, worker / reaper ループ
//! - **config**: SchedulerConfig
//! - **error**: SchedulerError, HandlerError

pub mod app;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod handler;
pub mod impls;
pub mod lease;
pub mod ports;
pub mod repo;

pub use app::{BuildError, SchedulerBuilder, TaskScheduler};
pub use config::{ConfigError, SchedulerConfig};
pub use domain::{EntityType, LeaseId, NewTask, PageIterator, TaskBuilder, TaskId, TaskInfo, TaskState};
pub use error::{HandlerError, SchedulerError};
pub use handler::{handler_fn, HandlerResult, TaskContext, TaskHandler};
