//! tierstore - Worker-side tiered block storage engine
//!
//! tierstore caches fixed-identity blocks across several local storage tiers
//! (memory, SSD, disk, ...) ranked from fastest to slowest. It decides where a
//! new block lives, reclaims space under pressure, and keeps the block index
//! and per-dir capacity accounting consistent under concurrent access.
//!
//! # Architecture
//!
//! - **Metadata** ([`metadata`]): tiers, dirs, the block index and byte
//!   accounting, owned by a single [`metadata::BlockMetadataManager`]
//! - **Policies** ([`policy`]): pluggable allocators (where a new block goes)
//!   and evictors (which blocks to drop or demote)
//! - **Locks** ([`lock`]): per-block shared/exclusive locks with owned handles
//! - **Store** ([`storage`]): [`storage::TieredBlockStore`] composes the above
//!   and implements create, write, commit, abort, move and remove
//! - **Metrics** ([`metrics`]): injected counter/gauge sink, no-op by default
//!
//! Byte transfer and the backing store are left to the caller; the store only
//! tracks sizes, reservations and locations.
//!
//! # Example
//!
//! ```rust
//! use tierstore::config::StoreConfig;
//! use tierstore::metadata::types::BlockStoreLocation;
//! use tierstore::storage::TieredBlockStore;
//!
//! let store = TieredBlockStore::from_config(&StoreConfig::default());
//!
//! let temp = store.create_block(1, BlockStoreLocation::AnyTier, 4096)?;
//! assert_eq!(temp.dir.tier, 0);
//! store.write_to_block(1, 4096)?;
//! let meta = store.commit_block(1)?;
//! assert_eq!(meta.size, 4096);
//!
//! let handle = store.lock_block_for_read(1)?;
//! store.unlock(handle)?;
//! # Ok::<(), tierstore::storage::StoreError>(())
//! ```

pub mod config;
pub mod lock;
pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod policy;
pub mod storage;
