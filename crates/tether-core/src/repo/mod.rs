//! Typed access to the shared tables.
//!
//! Everything above this layer speaks `TaskInfo` / `HolderRow` / `LeaseRecord`;
//! everything below speaks `Item` and field names.

pub mod leases;
pub mod locks;
pub mod tasks;

pub use leases::LeaseRepo;
pub use locks::LockRepo;
pub use tasks::{TaskPatch, TaskRepo};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::error::SchedulerError;
use crate::ports::{Item, Query, Store, StoreError};

pub(crate) fn to_item<T: Serialize>(value: &T) -> Result<Item, SchedulerError> {
    match serde_json::to_value(value)? {
        Value::Object(item) => Ok(item),
        other => Err(SchedulerError::Store(StoreError::Corrupt(format!(
            "expected a record, got {other}"
        )))),
    }
}

pub(crate) fn from_item<T: DeserializeOwned>(item: Item) -> Result<T, SchedulerError> {
    Ok(serde_json::from_value(Value::Object(item))?)
}

/// Run one page of `query` and decode every item.
pub(crate) async fn read_page<T: DeserializeOwned>(
    store: &Arc<dyn Store>,
    query: &Query,
) -> Result<(Vec<T>, Option<String>), SchedulerError> {
    let page = store.query(query).await?;
    let rows = page
        .items
        .into_iter()
        .map(from_item)
        .collect::<Result<Vec<T>, _>>()?;
    Ok((rows, page.next))
}

/// Turn a failed store condition into a typed scheduler error.
pub(crate) trait OnConflict<T> {
    fn on_conflict(self, err: impl FnOnce() -> SchedulerError) -> Result<T, SchedulerError>;
}

impl<T> OnConflict<T> for Result<T, StoreError> {
    fn on_conflict(self, err: impl FnOnce() -> SchedulerError) -> Result<T, SchedulerError> {
        match self {
            Ok(value) => Ok(value),
            Err(StoreError::ConditionFailed) => Err(err()),
            Err(other) => Err(SchedulerError::Store(other)),
        }
    }
}
