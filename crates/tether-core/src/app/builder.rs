//! SchedulerBuilder - 参加者の構築とワイヤリング
//!
//! 起動時に検証する（Fail-fast）:
//! - 同じ entity type への二重登録
//! - 予約済み entity type の登録
//! - `expect_entity_types` で宣言した型の登録漏れ
//! - 設定値の不整合

use std::sync::Arc;

use super::reaper_loop::{ReapHandler, REAP_ENTITY_TYPE};
use super::scheduler::{Shared, TaskScheduler};
use crate::config::{ConfigError, SchedulerConfig};
use crate::coordinator::LockCoordinator;
use crate::domain::EntityType;
use crate::error::SchedulerError;
use crate::handler::{HandlerRegistry, TaskHandler};
use crate::impls::{InMemoryStore, StoreSequence};
use crate::lease::LeaseManager;
use crate::ports::{Clock, Sequence, Store, SystemClock};
use crate::repo::{LeaseRepo, LockRepo, TaskRepo};

/// ```ignore
/// let scheduler = TaskScheduler::builder()
///     .register("billing.invoice", invoice_handler)?
///     .expect_entity_types(&["billing.invoice"])
///     .store(shared_store)
///     .build()?;
/// scheduler.monitor_task_queue();
/// ```
pub struct SchedulerBuilder {
    registry: HandlerRegistry,
    expected_entity_types: Option<Vec<String>>,
    config: SchedulerConfig,
    store: Option<Arc<dyn Store>>,
    sequence: Option<Arc<dyn Sequence>>,
    clock: Option<Arc<dyn Clock>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing entity types: {0:?}. These entity types were expected but not registered.")]
    MissingEntityTypes(Vec<String>),

    #[error("entity type {0} is reserved")]
    ReservedEntityType(String),

    #[error(transparent)]
    Registry(#[from] SchedulerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            expected_entity_types: None,
            config: SchedulerConfig::default(),
            store: None,
            sequence: None,
            clock: None,
        }
    }

    /// Register the handler for `entity_type`. Registering a type twice fails.
    pub fn register(
        mut self,
        entity_type: impl Into<EntityType>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, BuildError> {
        let entity_type = entity_type.into();
        if entity_type.as_str() == REAP_ENTITY_TYPE {
            return Err(BuildError::ReservedEntityType(entity_type.to_string()));
        }
        self.registry.register(entity_type, handler)?;
        Ok(self)
    }

    pub fn expect_entity_types(mut self, entity_types: &[&str]) -> Self {
        self.expected_entity_types = Some(entity_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Participants sharing a store form one cluster. Defaults to a private
    /// in-memory store.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to a counter kept in the store.
    pub fn sequence(mut self, sequence: Arc<dyn Sequence>) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<TaskScheduler, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_entity_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingEntityTypes(missing));
            }
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()) as Arc<dyn Store>);
        let sequence = self
            .sequence
            .unwrap_or_else(|| Arc::new(StoreSequence::new(Arc::clone(&store))) as Arc<dyn Sequence>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let config = self.config;
        let mut registry = self.registry;

        let page_size = config.page_size;
        let tasks = TaskRepo::new(Arc::clone(&store), page_size);
        let locks = LockRepo::new(Arc::clone(&store), page_size);
        let coordinator = LockCoordinator::new(locks.clone(), tasks.clone(), config.max_release_attempts);
        let leases = LeaseManager::new(LeaseRepo::new(store, page_size), &config);

        let shared = Arc::new_cyclic(|weak| {
            registry.install(REAP_ENTITY_TYPE.into(), Arc::new(ReapHandler::new(weak.clone())));
            Shared::new(tasks, locks, coordinator, leases, registry, sequence, clock, config)
        });
        Ok(TaskScheduler::from_shared(shared))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
