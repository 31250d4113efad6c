use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::instrument;

use super::dir::{DirSnapshot, StorageDir, StorageTier};
use super::types::{BlockId, BlockMeta, BlockStoreLocation, DirId, TempBlockMeta};
use crate::config::TierConfig;
use crate::policy::allocator::Allocator;
use crate::storage::error::{StoreError, StoreResult};

/// Tiers, dirs and the block index
///
/// Allocators and evictors only ever see this through a shared borrow handed
/// out by [`BlockMetadataManager::view`], so their decisions are always made
/// against accounting that agrees with the index.
pub struct StoreView {
    tiers: Vec<StorageTier>,
    /// Committed block id -> dir holding it
    blocks: HashMap<BlockId, DirId>,
    temp_blocks: HashMap<BlockId, TempBlockMeta>,
}

impl StoreView {
    fn new(tiers: Vec<StorageTier>) -> Self {
        Self {
            tiers,
            blocks: HashMap::new(),
            temp_blocks: HashMap::new(),
        }
    }

    pub fn tiers(&self) -> &[StorageTier] {
        &self.tiers
    }

    pub fn tier(&self, ordinal: usize) -> Option<&StorageTier> {
        self.tiers.get(ordinal)
    }

    pub fn dir(&self, id: DirId) -> Option<&StorageDir> {
        self.tiers.get(id.tier)?.dirs().get(id.index)
    }

    fn dir_mut(&mut self, id: DirId) -> Option<&mut StorageDir> {
        self.tiers.get_mut(id.tier)?.dirs_mut().get_mut(id.index)
    }

    /// Every dir, in tier-then-index order
    pub fn dirs(&self) -> impl Iterator<Item = &StorageDir> + '_ {
        self.tiers.iter().flat_map(|tier| tier.dirs().iter())
    }

    /// Dirs matched by `location`, in tier-then-index order
    pub fn dirs_in(&self, location: BlockStoreLocation) -> impl Iterator<Item = &StorageDir> + '_ {
        self.dirs().filter(move |dir| location.contains(dir.id()))
    }

    /// Whether `location` names tiers and dirs that exist
    pub fn is_valid(&self, location: &BlockStoreLocation) -> bool {
        match *location {
            BlockStoreLocation::AnyTier => true,
            BlockStoreLocation::AnyDirInTier(tier) => tier < self.tiers.len(),
            BlockStoreLocation::Dir(id) => self.dir(id).is_some(),
        }
    }

    pub fn get_block(&self, block_id: BlockId) -> Option<&BlockMeta> {
        let dir = self.blocks.get(&block_id)?;
        self.dir(*dir)?.peek_block(block_id)
    }

    pub fn get_temp_block(&self, block_id: BlockId) -> Option<&TempBlockMeta> {
        self.temp_blocks.get(&block_id)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn temp_block_count(&self) -> usize {
        self.temp_blocks.len()
    }
}

/// Capacity totals for gauges and reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityReport {
    pub capacity_bytes: u64,
    pub committed_bytes: u64,
    pub reserved_bytes: u64,
    pub block_count: usize,
    pub tiers: Vec<TierCapacity>,
}

impl CapacityReport {
    /// Committed plus reserved bytes
    pub fn used_bytes(&self) -> u64 {
        self.committed_bytes + self.reserved_bytes
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity_bytes - self.used_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierCapacity {
    pub ordinal: usize,
    pub alias: String,
    pub capacity_bytes: u64,
    pub committed_bytes: u64,
    pub available_bytes: u64,
}

/// Block metadata manager
///
/// Single source of truth for what lives where. Every mutation updates the
/// block index and the affected dir's byte accounting under the same write
/// lock, so no reader can observe the two out of sync.
pub struct BlockMetadataManager {
    state: RwLock<StoreView>,
}

impl BlockMetadataManager {
    pub fn new(tiers: Vec<StorageTier>) -> Self {
        Self {
            state: RwLock::new(StoreView::new(tiers)),
        }
    }

    /// Build the topology from configured tiers, fastest first
    pub fn from_config(tiers: &[TierConfig]) -> Self {
        let tiers = tiers
            .iter()
            .enumerate()
            .map(|(ordinal, tier)| {
                let dirs = tier
                    .dirs
                    .iter()
                    .enumerate()
                    .map(|(index, dir)| {
                        StorageDir::new(
                            DirId::new(ordinal, index),
                            dir.path.clone(),
                            dir.capacity_bytes,
                        )
                    })
                    .collect();
                StorageTier::new(ordinal, tier.alias.clone(), dirs)
            })
            .collect();
        Self::new(tiers)
    }

    /// Run `f` against a consistent read-only view of the store
    pub fn view<R>(&self, f: impl FnOnce(&StoreView) -> R) -> R {
        f(&self.state.read())
    }

    pub fn tier_count(&self) -> usize {
        self.state.read().tiers.len()
    }

    /// Accounting snapshot of every dir, grouped by tier
    pub fn tiers(&self) -> Vec<Vec<DirSnapshot>> {
        self.state
            .read()
            .tiers
            .iter()
            .map(|tier| tier.dirs().iter().map(StorageDir::snapshot).collect())
            .collect()
    }

    pub fn dir(&self, tier: usize, index: usize) -> Option<DirSnapshot> {
        self.state
            .read()
            .dir(DirId::new(tier, index))
            .map(StorageDir::snapshot)
    }

    pub fn dir_path(&self, dir: DirId) -> Option<PathBuf> {
        self.state.read().dir(dir).map(|d| d.path().to_path_buf())
    }

    pub fn get_block(&self, block_id: BlockId) -> StoreResult<BlockMeta> {
        self.state
            .read()
            .get_block(block_id)
            .cloned()
            .ok_or(StoreError::BlockNotFound(block_id))
    }

    pub fn get_temp_block(&self, block_id: BlockId) -> StoreResult<TempBlockMeta> {
        self.state
            .read()
            .get_temp_block(block_id)
            .cloned()
            .ok_or(StoreError::BlockNotFound(block_id))
    }

    pub fn has_block(&self, block_id: BlockId) -> bool {
        self.state.read().blocks.contains_key(&block_id)
    }

    pub fn has_temp_block(&self, block_id: BlockId) -> bool {
        self.state.read().temp_blocks.contains_key(&block_id)
    }

    /// Register a temp block and reserve `meta.reserved` bytes in its dir
    #[instrument(level = "trace", name = "meta_add_temp", skip(self, meta), fields(block_id = meta.block_id))]
    pub fn add_temp_block(&self, meta: TempBlockMeta) -> StoreResult<()> {
        let mut state = self.state.write();
        Self::add_temp_locked(&mut state, meta)
    }

    fn add_temp_locked(state: &mut StoreView, meta: TempBlockMeta) -> StoreResult<()> {
        let block_id = meta.block_id;
        if state.blocks.contains_key(&block_id) || state.temp_blocks.contains_key(&block_id) {
            return Err(StoreError::BlockAlreadyExists(block_id));
        }

        let dir = state
            .dir_mut(meta.dir)
            .ok_or(StoreError::InvalidLocation(BlockStoreLocation::Dir(meta.dir)))?;
        if !dir.reserve(meta.reserved) {
            return Err(StoreError::out_of_space(
                meta.reserved,
                BlockStoreLocation::Dir(meta.dir),
            ));
        }

        state.temp_blocks.insert(block_id, meta);
        Ok(())
    }

    /// Pick a dir with `allocator` and register the temp block there, atomically.
    ///
    /// Returns `Ok(None)` when no dir in `location` currently has room.
    #[instrument(level = "trace", name = "meta_allocate_temp", skip(self, allocator))]
    pub fn allocate_temp_block(
        &self,
        block_id: BlockId,
        initial_bytes: u64,
        location: BlockStoreLocation,
        allocator: &dyn Allocator,
    ) -> StoreResult<Option<TempBlockMeta>> {
        let mut state = self.state.write();
        if !state.is_valid(&location) {
            return Err(StoreError::InvalidLocation(location));
        }
        if state.blocks.contains_key(&block_id) || state.temp_blocks.contains_key(&block_id) {
            return Err(StoreError::BlockAlreadyExists(block_id));
        }

        let Some(dir) = allocator.allocate(&state, initial_bytes, &location) else {
            return Ok(None);
        };
        debug_assert!(location.contains(dir), "allocator left the requested location");

        let meta = TempBlockMeta::new(block_id, dir, initial_bytes);
        Self::add_temp_locked(&mut state, meta.clone())?;
        tracing::debug!("Allocated temp block {} in {}", block_id, dir);
        Ok(Some(meta))
    }

    /// Record `additional` written bytes, topping up the reservation if needed
    #[instrument(level = "trace", name = "meta_resize_temp", skip(self))]
    pub fn resize_temp_block(&self, block_id: BlockId, additional: u64) -> StoreResult<TempBlockMeta> {
        let mut state = self.state.write();
        let Some(meta) = state.temp_blocks.get(&block_id).cloned() else {
            if state.blocks.contains_key(&block_id) {
                return Err(StoreError::invalid_transition(
                    block_id,
                    "cannot write to a committed block",
                ));
            }
            return Err(StoreError::BlockNotFound(block_id));
        };

        let Some(new_size) = meta.size.checked_add(additional) else {
            return Err(StoreError::out_of_space(
                additional,
                BlockStoreLocation::Dir(meta.dir),
            ));
        };
        let top_up = new_size.saturating_sub(meta.reserved);
        if top_up > 0 {
            let dir = state
                .dir_mut(meta.dir)
                .ok_or(StoreError::InvalidLocation(BlockStoreLocation::Dir(meta.dir)))?;
            if !dir.reserve(top_up) {
                return Err(StoreError::out_of_space(
                    top_up,
                    BlockStoreLocation::Dir(meta.dir),
                ));
            }
        }

        let entry = state
            .temp_blocks
            .get_mut(&block_id)
            .ok_or(StoreError::BlockNotFound(block_id))?;
        entry.size = new_size;
        entry.reserved += top_up;
        Ok(entry.clone())
    }

    /// Freeze a temp block into a committed one
    #[instrument(level = "trace", name = "meta_commit", skip(self))]
    pub fn commit_temp_block(&self, block_id: BlockId) -> StoreResult<BlockMeta> {
        let mut state = self.state.write();
        if state.blocks.contains_key(&block_id) {
            return Err(StoreError::BlockAlreadyExists(block_id));
        }
        let temp = state.temp_blocks.get(&block_id).cloned().ok_or_else(|| {
            StoreError::invalid_transition(block_id, "no temp block to commit")
        })?;

        let committed = temp.to_committed();
        state
            .dir_mut(temp.dir)
            .ok_or(StoreError::InvalidLocation(BlockStoreLocation::Dir(temp.dir)))?
            .commit_reserved(committed.clone(), temp.reserved);
        state.temp_blocks.remove(&block_id);
        state.blocks.insert(block_id, temp.dir);

        tracing::debug!("Committed block {} ({} bytes) in {}", block_id, committed.size, temp.dir);
        Ok(committed)
    }

    /// Discard a temp block and release its reservation
    #[instrument(level = "trace", name = "meta_abort", skip(self))]
    pub fn abort_temp_block(&self, block_id: BlockId) -> StoreResult<TempBlockMeta> {
        let mut state = self.state.write();
        let Some(temp) = state.temp_blocks.remove(&block_id) else {
            let reason = if state.blocks.contains_key(&block_id) {
                "cannot abort a committed block"
            } else {
                "no temp block to abort"
            };
            return Err(StoreError::invalid_transition(block_id, reason));
        };

        if let Some(dir) = state.dir_mut(temp.dir) {
            dir.release(temp.reserved);
        }
        tracing::debug!("Aborted temp block {} in {}", block_id, temp.dir);
        Ok(temp)
    }

    /// Relocate a committed block to `dest`
    #[instrument(level = "trace", name = "meta_move", skip(self))]
    pub fn move_block(&self, block_id: BlockId, dest: DirId) -> StoreResult<BlockMeta> {
        let mut state = self.state.write();
        let src = *state
            .blocks
            .get(&block_id)
            .ok_or(StoreError::BlockNotFound(block_id))?;

        let size = state
            .get_block(block_id)
            .map(|meta| meta.size)
            .ok_or(StoreError::BlockNotFound(block_id))?;

        let dest_dir = state
            .dir(dest)
            .ok_or(StoreError::InvalidLocation(BlockStoreLocation::Dir(dest)))?;
        if src == dest {
            return Ok(BlockMeta::new(block_id, size, dest));
        }
        if dest_dir.available_bytes() < size {
            return Err(StoreError::out_of_space(size, BlockStoreLocation::Dir(dest)));
        }

        // Both dirs are checked above, so neither step below can fail.
        let mut meta = state
            .dir_mut(src)
            .and_then(|dir| dir.remove_block(block_id))
            .ok_or(StoreError::BlockNotFound(block_id))?;
        meta.dir = dest;
        if let Some(dir) = state.dir_mut(dest) {
            dir.insert_block(meta.clone());
        }
        state.blocks.insert(block_id, dest);

        tracing::debug!("Moved block {} from {} to {}", block_id, src, dest);
        Ok(meta)
    }

    /// Delete a committed block and free its space
    #[instrument(level = "trace", name = "meta_remove", skip(self))]
    pub fn remove_block(&self, block_id: BlockId) -> StoreResult<BlockMeta> {
        let mut state = self.state.write();
        let dir = state
            .blocks
            .remove(&block_id)
            .ok_or(StoreError::BlockNotFound(block_id))?;

        let meta = state
            .dir_mut(dir)
            .and_then(|d| d.remove_block(block_id))
            .ok_or(StoreError::BlockNotFound(block_id))?;

        tracing::debug!("Removed block {} ({} bytes) from {}", block_id, meta.size, dir);
        Ok(meta)
    }

    /// Mark a committed block as most recently used
    pub fn touch_block(&self, block_id: BlockId) -> StoreResult<()> {
        let mut state = self.state.write();
        let dir = *state
            .blocks
            .get(&block_id)
            .ok_or(StoreError::BlockNotFound(block_id))?;
        if let Some(d) = state.dir_mut(dir) {
            d.touch(block_id);
        }
        Ok(())
    }

    pub fn capacity(&self) -> CapacityReport {
        let state = self.state.read();
        let mut report = CapacityReport {
            block_count: state.blocks.len(),
            ..Default::default()
        };

        for tier in &state.tiers {
            for dir in tier.dirs() {
                report.capacity_bytes += dir.capacity_bytes();
                report.committed_bytes += dir.committed_bytes();
                report.reserved_bytes += dir.reserved_bytes();
            }
            report.tiers.push(TierCapacity {
                ordinal: tier.ordinal(),
                alias: tier.alias().to_string(),
                capacity_bytes: tier.capacity_bytes(),
                committed_bytes: tier.committed_bytes(),
                available_bytes: tier.available_bytes(),
            });
        }
        report
    }

    /// Recompute every dir's accounting from the index and compare.
    ///
    /// Returns a description of the first mismatch found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.state.read();

        for dir in state.dirs() {
            let resident: u64 = dir.blocks_lru().map(|m| m.size).sum();
            if resident != dir.committed_bytes() {
                return Err(format!(
                    "{}: committed {} but resident blocks sum to {}",
                    dir.id(),
                    dir.committed_bytes(),
                    resident
                ));
            }

            let reserved: u64 = state
                .temp_blocks
                .values()
                .filter(|t| t.dir == dir.id())
                .map(|t| t.reserved)
                .sum();
            if reserved != dir.reserved_bytes() {
                return Err(format!(
                    "{}: reserved {} but temp blocks hold {}",
                    dir.id(),
                    dir.reserved_bytes(),
                    reserved
                ));
            }

            if dir.committed_bytes() + dir.reserved_bytes() > dir.capacity_bytes() {
                return Err(format!("{}: over capacity", dir.id()));
            }

            for meta in dir.blocks_lru() {
                if state.blocks.get(&meta.block_id) != Some(&dir.id()) {
                    return Err(format!(
                        "{}: block {} not indexed here",
                        dir.id(),
                        meta.block_id
                    ));
                }
            }
        }

        let resident: usize = state.dirs().map(|d| d.block_count()).sum();
        if resident != state.blocks.len() {
            return Err(format!(
                "index holds {} blocks but dirs hold {}",
                state.blocks.len(),
                resident
            ));
        }

        for temp in state.temp_blocks.values() {
            if temp.size > temp.reserved {
                return Err(format!(
                    "temp block {} wrote {} bytes past its {} byte reservation",
                    temp.block_id, temp.size, temp.reserved
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirConfig;
    use crate::policy::allocator::GreedyAllocator;

    fn manager(capacities: &[&[u64]]) -> BlockMetadataManager {
        let tiers: Vec<TierConfig> = capacities
            .iter()
            .enumerate()
            .map(|(t, dirs)| TierConfig {
                alias: format!("T{}", t),
                dirs: dirs
                    .iter()
                    .enumerate()
                    .map(|(i, cap)| DirConfig {
                        path: PathBuf::from(format!("/tmp/t{}/d{}", t, i)),
                        capacity_bytes: *cap,
                    })
                    .collect(),
            })
            .collect();
        BlockMetadataManager::from_config(&tiers)
    }

    fn committed(mgr: &BlockMetadataManager, id: BlockId, size: u64, dir: DirId) {
        mgr.add_temp_block(TempBlockMeta::new(id, dir, size)).unwrap();
        mgr.resize_temp_block(id, size).unwrap();
        mgr.commit_temp_block(id).unwrap();
    }

    #[test]
    fn test_topology_from_config() {
        let mgr = manager(&[&[10], &[100, 200]]);
        assert_eq!(mgr.tier_count(), 2);
        let tiers = mgr.tiers();
        assert_eq!(tiers[1].len(), 2);
        assert_eq!(tiers[1][1].capacity_bytes, 200);
        assert_eq!(mgr.dir(1, 0).unwrap().path, PathBuf::from("/tmp/t1/d0"));
        assert!(mgr.dir(2, 0).is_none());
    }

    #[test]
    fn test_temp_block_lifecycle() {
        let mgr = manager(&[&[100]]);
        let dir = DirId::new(0, 0);

        mgr.add_temp_block(TempBlockMeta::new(1, dir, 60)).unwrap();
        assert_eq!(mgr.dir(0, 0).unwrap().reserved_bytes, 60);

        mgr.resize_temp_block(1, 40).unwrap();
        let meta = mgr.commit_temp_block(1).unwrap();
        assert_eq!(meta.size, 40);

        let snap = mgr.dir(0, 0).unwrap();
        assert_eq!(snap.committed_bytes, 40);
        assert_eq!(snap.reserved_bytes, 0);
        assert_eq!(mgr.get_block(1).unwrap(), meta);
        mgr.check_invariants().unwrap();
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mgr = manager(&[&[100]]);
        let dir = DirId::new(0, 0);
        committed(&mgr, 1, 10, dir);

        assert_eq!(
            mgr.add_temp_block(TempBlockMeta::new(1, dir, 5)),
            Err(StoreError::BlockAlreadyExists(1))
        );
        assert_eq!(
            mgr.commit_temp_block(1),
            Err(StoreError::BlockAlreadyExists(1))
        );
    }

    #[test]
    fn test_commit_unknown_temp_block() {
        let mgr = manager(&[&[100]]);
        assert!(matches!(
            mgr.commit_temp_block(9),
            Err(StoreError::InvalidStateTransition { block_id: 9, .. })
        ));
    }

    #[test]
    fn test_abort_releases_reservation_once() {
        let mgr = manager(&[&[100]]);
        mgr.add_temp_block(TempBlockMeta::new(1, DirId::new(0, 0), 70))
            .unwrap();
        mgr.resize_temp_block(1, 80).unwrap();
        assert_eq!(mgr.dir(0, 0).unwrap().reserved_bytes, 80);

        mgr.abort_temp_block(1).unwrap();
        assert_eq!(mgr.dir(0, 0).unwrap().available_bytes, 100);

        assert!(matches!(
            mgr.abort_temp_block(1),
            Err(StoreError::InvalidStateTransition { .. })
        ));
        assert_eq!(mgr.dir(0, 0).unwrap().available_bytes, 100);
        mgr.check_invariants().unwrap();
    }

    #[test]
    fn test_resize_out_of_space_leaves_state() {
        let mgr = manager(&[&[100]]);
        mgr.add_temp_block(TempBlockMeta::new(1, DirId::new(0, 0), 50))
            .unwrap();
        let err = mgr.resize_temp_block(1, 150).unwrap_err();
        assert!(matches!(err, StoreError::OutOfSpace { requested: 100, .. }));

        let temp = mgr.get_temp_block(1).unwrap();
        assert_eq!(temp.size, 0);
        assert_eq!(temp.reserved, 50);
        mgr.check_invariants().unwrap();
    }

    #[test]
    fn test_resize_overflow_is_out_of_space() {
        let mgr = manager(&[&[100]]);
        mgr.add_temp_block(TempBlockMeta::new(1, DirId::new(0, 0), 10))
            .unwrap();
        mgr.resize_temp_block(1, 5).unwrap();

        let err = mgr.resize_temp_block(1, u64::MAX).unwrap_err();
        assert!(matches!(err, StoreError::OutOfSpace { requested: u64::MAX, .. }));

        let temp = mgr.get_temp_block(1).unwrap();
        assert_eq!((temp.size, temp.reserved), (5, 10));
        assert_eq!(mgr.dir(0, 0).unwrap().reserved_bytes, 10);
        mgr.check_invariants().unwrap();
    }

    #[test]
    fn test_write_to_committed_block_rejected() {
        let mgr = manager(&[&[100]]);
        committed(&mgr, 1, 10, DirId::new(0, 0));
        assert!(matches!(
            mgr.resize_temp_block(1, 1),
            Err(StoreError::InvalidStateTransition { .. })
        ));
        assert_eq!(mgr.resize_temp_block(2, 1), Err(StoreError::BlockNotFound(2)));
    }

    #[test]
    fn test_move_block() {
        let mgr = manager(&[&[10], &[100]]);
        committed(&mgr, 1, 8, DirId::new(0, 0));

        let moved = mgr.move_block(1, DirId::new(1, 0)).unwrap();
        assert_eq!(moved.dir, DirId::new(1, 0));
        assert_eq!(mgr.dir(0, 0).unwrap().committed_bytes, 0);
        assert_eq!(mgr.dir(1, 0).unwrap().committed_bytes, 8);
        mgr.check_invariants().unwrap();
    }

    #[test]
    fn test_move_block_out_of_space() {
        let mgr = manager(&[&[10], &[100]]);
        committed(&mgr, 1, 50, DirId::new(1, 0));

        let err = mgr.move_block(1, DirId::new(0, 0)).unwrap_err();
        assert!(matches!(err, StoreError::OutOfSpace { requested: 50, .. }));
        assert_eq!(mgr.get_block(1).unwrap().dir, DirId::new(1, 0));
        mgr.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_block() {
        let mgr = manager(&[&[100]]);
        committed(&mgr, 1, 30, DirId::new(0, 0));

        mgr.remove_block(1).unwrap();
        assert_eq!(mgr.dir(0, 0).unwrap().committed_bytes, 0);
        assert_eq!(mgr.remove_block(1), Err(StoreError::BlockNotFound(1)));
        assert_eq!(mgr.get_block(1), Err(StoreError::BlockNotFound(1)));
    }

    #[test]
    fn test_allocate_temp_block() {
        let mgr = manager(&[&[10], &[100]]);
        let allocator = GreedyAllocator;

        let temp = mgr
            .allocate_temp_block(1, 50, BlockStoreLocation::AnyTier, &allocator)
            .unwrap()
            .unwrap();
        assert_eq!(temp.dir, DirId::new(1, 0));

        let none = mgr
            .allocate_temp_block(2, 60, BlockStoreLocation::AnyTier, &allocator)
            .unwrap();
        assert!(none.is_none());

        assert_eq!(
            mgr.allocate_temp_block(3, 1, BlockStoreLocation::AnyDirInTier(5), &allocator),
            Err(StoreError::InvalidLocation(BlockStoreLocation::AnyDirInTier(5)))
        );
    }

    #[test]
    fn test_capacity_report() {
        let mgr = manager(&[&[10], &[100]]);
        committed(&mgr, 1, 5, DirId::new(0, 0));
        mgr.add_temp_block(TempBlockMeta::new(2, DirId::new(1, 0), 20))
            .unwrap();

        let report = mgr.capacity();
        assert_eq!(report.capacity_bytes, 110);
        assert_eq!(report.committed_bytes, 5);
        assert_eq!(report.used_bytes(), 25);
        assert_eq!(report.free_bytes(), 85);
        assert_eq!(report.block_count, 1);
        assert_eq!(report.tiers[1].available_bytes, 80);
    }
}
