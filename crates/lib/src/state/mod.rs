//! State store.
//!
//! The only source of truth for what currently exists: per stack, each
//! resource's last-applied inputs, last-observed outputs and status.

mod lock;
mod storage;
mod types;

pub use lock::{LockMetadata, LockMode, StackLock, StackLockError};
pub use storage::StateStore;
pub use types::{Instance, ResourceState, ResourceStatus, StateError, StateRecord};
pub(crate) use types::unix_now;
