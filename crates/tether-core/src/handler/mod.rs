//! Handler - entity type ごとのビジネスロジック
//!
//! # 戻り値の意味
//! - `Ok(None)`: 完了（SUCCESS）
//! - `Ok(Some(task))`: 変更（locks, prerequisites, delay, checkpoint）を保存して
//!   QUEUED に戻し、もう一度実行する
//! - `Err(HandlerError)`: FAILED。自動リトライはしない

mod context;
mod registry;

pub use context::TaskContext;
pub use registry::HandlerRegistry;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::domain::TaskInfo;
use crate::error::HandlerError;

pub type HandlerResult = Result<Option<TaskInfo>, HandlerError>;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> HandlerResult;
}

/// Adapter so a plain async closure can be registered as a handler.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> HandlerResult {
        (self.f)(ctx).await
    }
}

/// ```ignore
/// let handler = handler_fn(|ctx| async move {
///     tracing::info!(task_id = %ctx.task().task_id, "hello");
///     Ok(None)
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
