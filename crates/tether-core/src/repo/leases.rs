use std::sync::Arc;

use super::{read_page, to_item, OnConflict};
use crate::domain::{LeaseId, LeaseRecord};
use crate::error::SchedulerError;
use crate::ports::{Key, Query, QueryKey, Store, Table, Update};

const LEASE_ID: &str = "leaseId";
const HEARTBEAT: &str = "heartbeat";

#[derive(Clone)]
pub struct LeaseRepo {
    store: Arc<dyn Store>,
    page_size: usize,
}

impl LeaseRepo {
    pub fn new(store: Arc<dyn Store>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    pub async fn insert(&self, record: &LeaseRecord) -> Result<(), SchedulerError> {
        self.store
            .put(Table::Leases, &Key::hash(record.lease_id.key()), to_item(record)?)
            .await?;
        Ok(())
    }

    /// Bump the heartbeat of a lease row that still exists.
    /// A deleted row (reaped) is reported as `LostLease`.
    pub async fn renew(&self, lease_id: LeaseId) -> Result<i64, SchedulerError> {
        let update = Update::new().when_exists(LEASE_ID).increment(HEARTBEAT, 1);
        let item = self
            .store
            .update(Table::Leases, &Key::hash(lease_id.key()), &update)
            .await
            .on_conflict(|| SchedulerError::LostLease(lease_id))?;
        Ok(item.get(HEARTBEAT).and_then(|v| v.as_i64()).unwrap_or_default())
    }

    pub async fn delete(&self, lease_id: LeaseId) -> Result<(), SchedulerError> {
        self.store
            .delete(Table::Leases, &Key::hash(lease_id.key()), &[])
            .await?;
        Ok(())
    }

    /// Every lease row, read page by page.
    pub async fn all(&self) -> Result<Vec<LeaseRecord>, SchedulerError> {
        let mut records = Vec::new();
        let mut after = None;
        loop {
            let query = Query {
                table: Table::Leases,
                key: QueryKey::Scan,
                after,
                limit: self.page_size,
            };
            let (page, next) = read_page(&self.store, &query).await?;
            records.extend(page);
            match next {
                Some(marker) => after = Some(marker),
                None => return Ok(records),
            }
        }
    }
}
