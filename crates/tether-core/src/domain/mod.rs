//! Domain model (IDs, task records, lock rows, leases).

pub mod ids;
pub mod lease;
pub mod lock;
pub mod page;
pub mod state;
pub mod task;

pub use ids::{LeaseId, TaskId};
pub use lease::LeaseRecord;
pub use lock::{check_named_lock, HolderRow, LockId, WaiterRow, SELF_LOCK_PREFIX, SENTINEL};
pub use page::PageIterator;
pub use state::TaskState;
pub use task::{EntityType, NewTask, OwnerRef, TaskBuilder, TaskInfo};
