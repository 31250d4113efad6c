//! Block lock management
//!
//! Allocation, eviction and client I/O never race on the same block: each of
//! them holds a shared or exclusive lease from the [`LockManager`] first.

pub mod manager;

pub use manager::{LockHandle, LockId, LockManager, LockMode};
