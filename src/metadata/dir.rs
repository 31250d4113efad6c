//! Storage dirs and tiers
//!
//! A [`StorageDir`] owns the byte accounting of one physical location and the
//! committed blocks resident in it. Blocks are kept in recency order so the
//! evictor can walk them least recently used first.

use lru::LruCache;
use std::path::{Path, PathBuf};

use super::types::{BlockId, BlockMeta, DirId};

/// One physical storage location inside a tier
pub struct StorageDir {
    id: DirId,
    path: PathBuf,
    capacity: u64,
    committed: u64,
    reserved: u64,
    /// Resident committed blocks, most recently used at the front
    blocks: LruCache<BlockId, BlockMeta>,
}

impl StorageDir {
    pub fn new(id: DirId, path: PathBuf, capacity: u64) -> Self {
        Self {
            id,
            path,
            capacity,
            committed: 0,
            reserved: 0,
            blocks: LruCache::unbounded(),
        }
    }

    pub fn id(&self) -> DirId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    pub fn committed_bytes(&self) -> u64 {
        self.committed
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved
    }

    pub fn available_bytes(&self) -> u64 {
        self.capacity - self.committed - self.reserved
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn has_block(&self, block_id: BlockId) -> bool {
        self.blocks.contains(&block_id)
    }

    pub fn peek_block(&self, block_id: BlockId) -> Option<&BlockMeta> {
        self.blocks.peek(&block_id)
    }

    /// Resident blocks, least recently used first
    pub fn blocks_lru(&self) -> impl Iterator<Item = &BlockMeta> {
        self.blocks.iter().rev().map(|(_, meta)| meta)
    }

    /// Hold `bytes` for an in-flight block. Returns false when the dir lacks room.
    pub(crate) fn reserve(&mut self, bytes: u64) -> bool {
        if bytes > self.available_bytes() {
            return false;
        }
        self.reserved += bytes;
        true
    }

    pub(crate) fn release(&mut self, bytes: u64) {
        debug_assert!(bytes <= self.reserved, "releasing more than reserved");
        self.reserved -= bytes.min(self.reserved);
    }

    /// Turn a reservation into a committed block.
    ///
    /// `meta.size` must not exceed `reserved`, so the dir never overflows.
    pub(crate) fn commit_reserved(&mut self, meta: BlockMeta, reserved: u64) {
        debug_assert!(meta.size <= reserved);
        self.release(reserved);
        self.committed += meta.size;
        self.blocks.put(meta.block_id, meta);
    }

    /// Place an already committed block here. Returns false when the dir lacks room.
    pub(crate) fn insert_block(&mut self, meta: BlockMeta) -> bool {
        if meta.size > self.available_bytes() {
            return false;
        }
        self.committed += meta.size;
        self.blocks.put(meta.block_id, meta);
        true
    }

    pub(crate) fn remove_block(&mut self, block_id: BlockId) -> Option<BlockMeta> {
        let meta = self.blocks.pop(&block_id)?;
        self.committed -= meta.size;
        Some(meta)
    }

    pub(crate) fn touch(&mut self, block_id: BlockId) {
        self.blocks.promote(&block_id);
    }

    pub fn snapshot(&self) -> DirSnapshot {
        DirSnapshot {
            id: self.id,
            path: self.path.clone(),
            capacity_bytes: self.capacity,
            committed_bytes: self.committed,
            reserved_bytes: self.reserved,
            available_bytes: self.available_bytes(),
            block_count: self.blocks.len(),
        }
    }
}

/// Point-in-time copy of a dir's accounting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirSnapshot {
    pub id: DirId,
    pub path: PathBuf,
    pub capacity_bytes: u64,
    pub committed_bytes: u64,
    pub reserved_bytes: u64,
    pub available_bytes: u64,
    pub block_count: usize,
}

/// Ordered dirs sharing a speed class
pub struct StorageTier {
    ordinal: usize,
    alias: String,
    dirs: Vec<StorageDir>,
}

impl StorageTier {
    pub fn new(ordinal: usize, alias: String, dirs: Vec<StorageDir>) -> Self {
        Self {
            ordinal,
            alias,
            dirs,
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn dirs(&self) -> &[StorageDir] {
        &self.dirs
    }

    pub(crate) fn dirs_mut(&mut self) -> &mut [StorageDir] {
        &mut self.dirs
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.dirs.iter().map(|d| d.capacity_bytes()).sum()
    }

    pub fn committed_bytes(&self) -> u64 {
        self.dirs.iter().map(|d| d.committed_bytes()).sum()
    }

    pub fn available_bytes(&self) -> u64 {
        self.dirs.iter().map(|d| d.available_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(capacity: u64) -> StorageDir {
        StorageDir::new(DirId::new(0, 0), PathBuf::from("/tmp/tier0"), capacity)
    }

    #[test]
    fn test_reserve_and_release() {
        let mut d = dir(100);
        assert!(d.reserve(60));
        assert_eq!(d.available_bytes(), 40);
        assert!(!d.reserve(50));
        assert_eq!(d.reserved_bytes(), 60);

        d.release(60);
        assert_eq!(d.available_bytes(), 100);
    }

    #[test]
    fn test_commit_reserved_frees_unused_reservation() {
        let mut d = dir(100);
        assert!(d.reserve(60));
        d.commit_reserved(BlockMeta::new(1, 45, d.id()), 60);

        assert_eq!(d.committed_bytes(), 45);
        assert_eq!(d.reserved_bytes(), 0);
        assert_eq!(d.available_bytes(), 55);
        assert!(d.has_block(1));
    }

    #[test]
    fn test_insert_and_remove() {
        let mut d = dir(10);
        assert!(d.insert_block(BlockMeta::new(1, 8, d.id())));
        assert!(!d.insert_block(BlockMeta::new(2, 8, d.id())));

        let removed = d.remove_block(1).unwrap();
        assert_eq!(removed.size, 8);
        assert_eq!(d.committed_bytes(), 0);
        assert!(d.remove_block(1).is_none());
    }

    #[test]
    fn test_lru_order_follows_touch() {
        let mut d = dir(100);
        for id in 1..=3 {
            assert!(d.insert_block(BlockMeta::new(id, 1, d.id())));
        }
        let order: Vec<_> = d.blocks_lru().map(|m| m.block_id).collect();
        assert_eq!(order, vec![1, 2, 3]);

        d.touch(1);
        let order: Vec<_> = d.blocks_lru().map(|m| m.block_id).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_tier_totals() {
        let dirs = vec![
            StorageDir::new(DirId::new(1, 0), PathBuf::from("/a"), 10),
            StorageDir::new(DirId::new(1, 1), PathBuf::from("/b"), 20),
        ];
        let tier = StorageTier::new(1, "SSD".to_string(), dirs);
        assert_eq!(tier.capacity_bytes(), 30);
        assert_eq!(tier.available_bytes(), 30);
        assert_eq!(tier.alias(), "SSD");
    }
}
