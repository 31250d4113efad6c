//! Tiered block store
//!
//! [`TieredBlockStore`] is the entry point used by the worker's I/O layer. It
//! composes the metadata manager, the lock manager and the configured
//! allocation and eviction policies, and reports every successful mutation to
//! the injected metrics sink.
//!
//! Lock ordering: the lock table is always consulted before the metadata
//! lock is taken, never while it is held. Eviction only ever *tries* victim
//! locks, so it cannot deadlock against a client holding a lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::config::{PolicyConfig, StoreConfig};
use crate::lock::{LockHandle, LockManager, LockMode};
use crate::metadata::manager::{BlockMetadataManager, CapacityReport};
use crate::metadata::types::{BlockId, BlockMeta, BlockStoreLocation, DirId, TempBlockMeta};
use crate::metrics::{Counter, Gauge, MetricsSink, NoopMetrics};
use crate::policy::{Allocator, EvictionAction, EvictionPlan, Evictor};
use crate::storage::error::{StoreError, StoreResult};

/// Outcome of running one eviction plan
enum PlanOutcome {
    Applied,
    /// A victim was locked or changed after planning
    Raced,
}

/// Worker-side tiered block store
pub struct TieredBlockStore {
    meta: BlockMetadataManager,
    locks: LockManager,
    allocator: Box<dyn Allocator>,
    evictor: Box<dyn Evictor>,
    metrics: Arc<dyn MetricsSink>,
    max_eviction_retries: u32,
    lock_timeout: Duration,
}

impl TieredBlockStore {
    /// Build a store with the configured policies and no metrics
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config, Arc::new(NoopMetrics))
    }

    pub fn new(config: &StoreConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_strategies(
            config,
            config.policy.allocator.build(),
            config.policy.evictor.build(config.policy.demote),
            metrics,
        )
    }

    /// Build a store with explicit strategy objects
    pub fn with_strategies(
        config: &StoreConfig,
        allocator: Box<dyn Allocator>,
        evictor: Box<dyn Evictor>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let policy: &PolicyConfig = &config.policy;
        let store = Self {
            meta: BlockMetadataManager::from_config(&config.tiers),
            locks: LockManager::new(),
            allocator,
            evictor,
            metrics,
            max_eviction_retries: policy.max_eviction_retries.max(1),
            lock_timeout: policy.lock_timeout(),
        };

        tracing::info!(
            "Tiered store ready: {} tiers, {} bytes, allocator={:?}, evictor={:?}",
            store.meta.tier_count(),
            store.capacity().capacity_bytes,
            store.allocator.kind(),
            store.evictor.kind()
        );
        store.refresh_gauges();
        store
    }

    /// Read-only access to the block metadata
    pub fn metadata(&self) -> &BlockMetadataManager {
        &self.meta
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    // ----- block lifecycle -----

    /// Reserve `initial_bytes` for a new temp block inside `location`.
    ///
    /// Evicts (or demotes) unlocked committed blocks when no dir has room.
    #[instrument(level = "debug", name = "create_block", skip(self))]
    pub fn create_block(
        &self,
        block_id: BlockId,
        location: BlockStoreLocation,
        initial_bytes: u64,
    ) -> StoreResult<TempBlockMeta> {
        if self.meta.has_block(block_id) || self.meta.has_temp_block(block_id) {
            return Err(StoreError::BlockAlreadyExists(block_id));
        }
        let _guard = self.lock_exclusive(block_id)?;

        let meta = self.with_eviction(initial_bytes, location, |loc| {
            self.meta
                .allocate_temp_block(block_id, initial_bytes, loc, self.allocator.as_ref())
        })?;

        tracing::debug!("Created temp block {} in {}", block_id, meta.dir);
        self.refresh_gauges();
        Ok(meta)
    }

    /// Record `bytes` more written into a temp block.
    ///
    /// The caller is expected to hold the block's lock for the duration of the
    /// byte transfer; [`write_to_block_locked`](Self::write_to_block_locked)
    /// checks the handle. Fails with `OutOfSpace` when the dir cannot cover
    /// the growth; nothing is evicted.
    #[instrument(level = "trace", name = "write_to_block", skip(self))]
    pub fn write_to_block(&self, block_id: BlockId, bytes: u64) -> StoreResult<TempBlockMeta> {
        let meta = self.meta.resize_temp_block(block_id, bytes)?;
        self.refresh_gauges();
        Ok(meta)
    }

    /// [`write_to_block`](Self::write_to_block) for a writer holding
    /// `handle`, an exclusive lock on the block.
    #[instrument(level = "trace", name = "write_to_block_locked", skip(self, handle), fields(block_id = handle.block_id()))]
    pub fn write_to_block_locked(&self, handle: &LockHandle, bytes: u64) -> StoreResult<TempBlockMeta> {
        self.locks.check_held(handle, LockMode::Exclusive)?;
        self.write_to_block(handle.block_id(), bytes)
    }

    /// Like [`write_to_block`](Self::write_to_block), but frees space inside
    /// the block's dir when the reservation cannot be topped up.
    #[instrument(level = "debug", name = "request_space", skip(self))]
    pub fn request_space(&self, block_id: BlockId, bytes: u64) -> StoreResult<TempBlockMeta> {
        match self.meta.resize_temp_block(block_id, bytes) {
            Err(StoreError::OutOfSpace { .. }) => {}
            other => {
                self.refresh_gauges();
                return other;
            }
        }

        let temp = self.meta.get_temp_block(block_id)?;
        let top_up = temp
            .top_up_for(bytes)
            .ok_or(StoreError::out_of_space(bytes, BlockStoreLocation::Dir(temp.dir)))?;
        let meta = self.with_eviction(top_up, BlockStoreLocation::Dir(temp.dir), |_| {
            match self.meta.resize_temp_block(block_id, bytes) {
                Ok(meta) => Ok(Some(meta)),
                Err(StoreError::OutOfSpace { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })?;

        self.refresh_gauges();
        Ok(meta)
    }

    /// Freeze a temp block; its size becomes immutable
    #[instrument(level = "debug", name = "commit_block", skip(self))]
    pub fn commit_block(&self, block_id: BlockId) -> StoreResult<BlockMeta> {
        let _guard = self.lock_exclusive(block_id)?;
        self.commit_held(block_id)
    }

    /// Commit a temp block whose exclusive lock the caller already holds.
    ///
    /// The lock stays with the caller; release it with [`unlock`](Self::unlock).
    #[instrument(level = "debug", name = "commit_block_locked", skip(self, handle), fields(block_id = handle.block_id()))]
    pub fn commit_block_locked(&self, handle: &LockHandle) -> StoreResult<BlockMeta> {
        self.locks.check_held(handle, LockMode::Exclusive)?;
        self.commit_held(handle.block_id())
    }

    fn commit_held(&self, block_id: BlockId) -> StoreResult<BlockMeta> {
        let meta = self.meta.commit_temp_block(block_id)?;

        self.metrics.inc(Counter::BlocksWritten, 1);
        self.metrics.inc(Counter::BytesWritten, meta.size);
        self.refresh_gauges();
        Ok(meta)
    }

    /// Discard a temp block and release its reservation
    #[instrument(level = "debug", name = "abort_block", skip(self))]
    pub fn abort_block(&self, block_id: BlockId) -> StoreResult<()> {
        let _guard = self.lock_exclusive(block_id)?;
        self.abort_held(block_id)
    }

    /// Abort a temp block whose exclusive lock the caller already holds
    #[instrument(level = "debug", name = "abort_block_locked", skip(self, handle), fields(block_id = handle.block_id()))]
    pub fn abort_block_locked(&self, handle: &LockHandle) -> StoreResult<()> {
        self.locks.check_held(handle, LockMode::Exclusive)?;
        self.abort_held(handle.block_id())
    }

    fn abort_held(&self, block_id: BlockId) -> StoreResult<()> {
        self.meta.abort_temp_block(block_id)?;

        self.metrics.inc(Counter::BlocksCanceled, 1);
        self.refresh_gauges();
        Ok(())
    }

    /// Relocate a committed block into `location`.
    ///
    /// A block already inside `location` stays where it is.
    #[instrument(level = "debug", name = "move_block", skip(self))]
    pub fn move_block(&self, block_id: BlockId, location: BlockStoreLocation) -> StoreResult<BlockMeta> {
        let _guard = self.lock_exclusive(block_id)?;
        let current = self.meta.get_block(block_id)?;
        if !self.meta.view(|v| v.is_valid(&location)) {
            return Err(StoreError::InvalidLocation(location));
        }
        if location.contains(current.dir) {
            return Ok(current);
        }

        let moved = self.with_eviction(current.size, location, |loc| {
            let Some(dest) = self
                .meta
                .view(|v| self.allocator.allocate(v, current.size, &loc))
            else {
                return Ok(None);
            };
            match self.meta.move_block(block_id, dest) {
                Ok(meta) => Ok(Some(meta)),
                Err(StoreError::OutOfSpace { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })?;

        if moved.dir.tier < current.dir.tier {
            self.metrics.inc(Counter::BlocksPromoted, 1);
        }
        self.refresh_gauges();
        Ok(moved)
    }

    /// Delete a committed block
    #[instrument(level = "debug", name = "remove_block", skip(self))]
    pub fn remove_block(&self, block_id: BlockId) -> StoreResult<BlockMeta> {
        let _guard = self.lock_exclusive(block_id)?;
        let meta = self.meta.remove_block(block_id)?;

        self.metrics.inc(Counter::BlocksDeleted, 1);
        self.refresh_gauges();
        Ok(meta)
    }

    // ----- locking -----

    /// Lock a known block, waiting at most `timeout` (forever when `None`)
    #[instrument(level = "trace", name = "lock_block", skip(self))]
    pub fn lock_block(
        &self,
        block_id: BlockId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> StoreResult<LockHandle> {
        if !self.exists(block_id) {
            return Err(StoreError::BlockNotFound(block_id));
        }
        let handle = self.locks.lock_block(block_id, mode, timeout)?;

        // Removed while we were waiting
        if !self.exists(block_id) {
            drop(handle);
            return Err(StoreError::BlockNotFound(block_id));
        }
        Ok(handle)
    }

    /// Shared lock on a committed block for the read path
    #[instrument(level = "trace", name = "lock_block_for_read", skip(self))]
    pub fn lock_block_for_read(&self, block_id: BlockId) -> StoreResult<LockHandle> {
        if !self.meta.has_block(block_id) {
            return Err(StoreError::BlockNotFound(block_id));
        }
        let handle = self
            .locks
            .lock_block(block_id, LockMode::Shared, Some(self.lock_timeout))?;
        self.access_block(block_id)?;
        Ok(handle)
    }

    pub fn unlock(&self, handle: LockHandle) -> StoreResult<()> {
        self.locks.unlock(handle)
    }

    // ----- queries and access tracking -----

    pub fn get_block(&self, block_id: BlockId) -> StoreResult<BlockMeta> {
        self.meta.get_block(block_id)
    }

    pub fn get_temp_block(&self, block_id: BlockId) -> StoreResult<TempBlockMeta> {
        self.meta.get_temp_block(block_id)
    }

    /// Dir that currently holds a committed or temp block
    pub fn locate(&self, block_id: BlockId) -> StoreResult<DirId> {
        match self.meta.get_block(block_id) {
            Ok(meta) => Ok(meta.dir),
            Err(_) => Ok(self.meta.get_temp_block(block_id)?.dir),
        }
    }

    /// Where the block's bytes live on disk, temp or committed
    pub fn block_path(&self, block_id: BlockId) -> StoreResult<PathBuf> {
        let root = |dir: DirId| {
            self.meta
                .dir_path(dir)
                .ok_or(StoreError::InvalidLocation(BlockStoreLocation::Dir(dir)))
        };
        match self.meta.get_block(block_id) {
            Ok(meta) => Ok(meta.path(&root(meta.dir)?)),
            Err(_) => {
                let temp = self.meta.get_temp_block(block_id)?;
                Ok(temp.path(&root(temp.dir)?))
            }
        }
    }

    /// Mark a committed block as just used
    pub fn access_block(&self, block_id: BlockId) -> StoreResult<()> {
        self.meta.touch_block(block_id)?;
        self.metrics.inc(Counter::BlocksAccessed, 1);
        Ok(())
    }

    /// Report bytes served to a client, from this worker or a remote one
    pub fn record_read(&self, local: bool, bytes: u64) {
        if local {
            self.metrics.inc(Counter::BlocksReadLocal, 1);
            self.metrics.inc(Counter::BytesReadLocal, bytes);
        } else {
            self.metrics.inc(Counter::BlocksReadRemote, 1);
            self.metrics.inc(Counter::BytesReadRemote, bytes);
        }
    }

    /// Report bytes fetched from the backing store
    pub fn record_ufs_read(&self, bytes: u64) {
        self.metrics.inc(Counter::BytesReadUfs, bytes);
    }

    pub fn capacity(&self) -> CapacityReport {
        self.meta.capacity()
    }

    /// Recompute accounting from the block index; for tests and debugging
    pub fn check_invariants(&self) -> Result<(), String> {
        self.meta.check_invariants()
    }

    // ----- space reclamation -----

    /// Make sure some dir in `location` has `size` available bytes
    #[instrument(level = "debug", name = "free_space", skip(self))]
    pub fn free_space(&self, size: u64, location: BlockStoreLocation) -> StoreResult<()> {
        self.with_eviction(size, location, |loc| {
            let fits = self
                .meta
                .view(|v| v.dirs_in(loc).any(|dir| dir.available_bytes() >= size));
            Ok(fits.then_some(()))
        })?;
        self.refresh_gauges();
        Ok(())
    }

    /// Run `place` against `location`; while it finds no room, plan an
    /// eviction, apply it, and retry `place` against the freed dir.
    ///
    /// The lock snapshot handed to the evictor can be stale by the time a
    /// victim is touched. A victim that got locked (or moved) in between
    /// aborts the attempt; attempts are bounded by `max_eviction_retries`.
    fn with_eviction<T>(
        &self,
        size: u64,
        location: BlockStoreLocation,
        mut place: impl FnMut(BlockStoreLocation) -> StoreResult<Option<T>>,
    ) -> StoreResult<T> {
        if let Some(placed) = place(location)? {
            return Ok(placed);
        }

        for attempt in 1..=self.max_eviction_retries {
            let locked = self.locks.locked_blocks();
            let plan = self
                .meta
                .view(|v| self.evictor.free_space(v, size, &location, &locked))?;

            tracing::debug!(
                "Eviction attempt {}: {} victims, {} bytes in {}",
                attempt,
                plan.actions.len(),
                plan.bytes_freed(),
                plan.target
            );

            match self.apply_plan(&plan)? {
                PlanOutcome::Applied => {
                    if let Some(placed) = place(BlockStoreLocation::Dir(plan.target))? {
                        return Ok(placed);
                    }
                }
                PlanOutcome::Raced => {
                    tracing::debug!("Eviction attempt {} lost a race, replanning", attempt);
                }
            }
        }

        tracing::warn!(
            "Giving up on {} bytes in {} after {} eviction attempts",
            size,
            location,
            self.max_eviction_retries
        );
        Err(StoreError::out_of_space(size, location))
    }

    /// Execute a plan action by action, each under a transient exclusive lock
    fn apply_plan(&self, plan: &EvictionPlan) -> StoreResult<PlanOutcome> {
        for action in &plan.actions {
            let Some(_victim) = self.locks.try_lock_block(action.block_id, LockMode::Exclusive) else {
                return Ok(PlanOutcome::Raced);
            };

            match self.meta.get_block(action.block_id) {
                Ok(meta) if meta.dir == action.from => {}
                _ => return Ok(PlanOutcome::Raced),
            }

            match action.action {
                EvictionAction::Evict => {
                    self.meta.remove_block(action.block_id)?;
                    self.metrics.inc(Counter::BlocksEvicted, 1);
                    tracing::debug!("Evicted block {} from {}", action.block_id, action.from);
                }
                EvictionAction::MoveTo(dest) => match self.meta.move_block(action.block_id, dest) {
                    Ok(_) => {
                        self.metrics.inc(Counter::BlocksDemoted, 1);
                        tracing::debug!(
                            "Demoted block {} from {} to {}",
                            action.block_id,
                            action.from,
                            dest
                        );
                    }
                    Err(StoreError::OutOfSpace { .. }) => return Ok(PlanOutcome::Raced),
                    Err(e) => return Err(e),
                },
            }
        }
        self.refresh_gauges();
        Ok(PlanOutcome::Applied)
    }

    // ----- helpers -----

    fn exists(&self, block_id: BlockId) -> bool {
        self.meta.has_block(block_id) || self.meta.has_temp_block(block_id)
    }

    fn lock_exclusive(&self, block_id: BlockId) -> StoreResult<LockHandle> {
        self.locks
            .lock_block(block_id, LockMode::Exclusive, Some(self.lock_timeout))
    }

    fn refresh_gauges(&self) {
        let report = self.meta.capacity();
        self.metrics.set(Gauge::CapacityTotal, report.capacity_bytes);
        self.metrics.set(Gauge::CapacityUsed, report.used_bytes());
        self.metrics.set(Gauge::CapacityFree, report.free_bytes());
        self.metrics.set(Gauge::BlocksCached, report.block_count as u64);
    }
}
