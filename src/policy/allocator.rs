//! Allocation strategies
//!
//! An allocator picks the dir a new block should be placed in. It only reads
//! the [`StoreView`] it is given; reserving the space is left to the caller.
//! Returning `None` is the normal signal that eviction has to run first.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::metadata::manager::StoreView;
use crate::metadata::types::{BlockStoreLocation, DirId};

/// Placement strategy for new blocks
pub trait Allocator: Send + Sync {
    /// Pick a dir inside `location` with at least `size` available bytes
    fn allocate(&self, view: &StoreView, size: u64, location: &BlockStoreLocation)
        -> Option<DirId>;

    fn kind(&self) -> AllocatorKind;
}

/// Allocator selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorKind {
    /// First fitting dir in tier-then-index order
    Greedy,
    /// Most-free dir of the fastest tier that can hold the block
    #[default]
    MaxFree,
    /// Rotate through the dirs of the fastest tier that can hold the block
    RoundRobin,
}

impl AllocatorKind {
    pub fn build(self) -> Box<dyn Allocator> {
        match self {
            Self::Greedy => Box::new(GreedyAllocator),
            Self::MaxFree => Box::new(MaxFreeAllocator),
            Self::RoundRobin => Box::new(RoundRobinAllocator::new()),
        }
    }
}

/// Tier ordinals a location covers, fastest first
fn candidate_tiers(view: &StoreView, location: &BlockStoreLocation) -> Vec<usize> {
    match *location {
        BlockStoreLocation::AnyTier => (0..view.tiers().len()).collect(),
        BlockStoreLocation::AnyDirInTier(tier) => vec![tier],
        BlockStoreLocation::Dir(id) => vec![id.tier],
    }
}

/// Greedy first-fit allocator
pub struct GreedyAllocator;

impl Allocator for GreedyAllocator {
    fn allocate(
        &self,
        view: &StoreView,
        size: u64,
        location: &BlockStoreLocation,
    ) -> Option<DirId> {
        view.dirs_in(*location)
            .find(|dir| dir.available_bytes() >= size)
            .map(|dir| dir.id())
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Greedy
    }
}

/// Max-free allocator
///
/// Tiers are scanned fastest first. Within the first tier that has at least
/// one fitting dir, the dir with the most available bytes wins; equal free
/// space goes to the lowest dir index. A fast tier with room is therefore
/// always preferred over a slower tier with more room.
pub struct MaxFreeAllocator;

impl Allocator for MaxFreeAllocator {
    fn allocate(
        &self,
        view: &StoreView,
        size: u64,
        location: &BlockStoreLocation,
    ) -> Option<DirId> {
        for ordinal in candidate_tiers(view, location) {
            let Some(tier) = view.tier(ordinal) else {
                continue;
            };

            let mut best: Option<(DirId, u64)> = None;
            for dir in tier.dirs() {
                if !location.contains(dir.id()) || dir.available_bytes() < size {
                    continue;
                }
                match best {
                    Some((_, free)) if free >= dir.available_bytes() => {}
                    _ => best = Some((dir.id(), dir.available_bytes())),
                }
            }

            if let Some((id, _)) = best {
                return Some(id);
            }
        }
        None
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::MaxFree
    }
}

/// Round-robin allocator
///
/// Keeps one cursor per tier. The cursor is the allocator's own state; the
/// store is never touched.
pub struct RoundRobinAllocator {
    cursors: Mutex<HashMap<usize, usize>>,
}

impl RoundRobinAllocator {
    pub fn new() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RoundRobinAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for RoundRobinAllocator {
    fn allocate(
        &self,
        view: &StoreView,
        size: u64,
        location: &BlockStoreLocation,
    ) -> Option<DirId> {
        let mut cursors = self.cursors.lock();

        for ordinal in candidate_tiers(view, location) {
            let Some(tier) = view.tier(ordinal) else {
                continue;
            };
            let dirs = tier.dirs();
            if dirs.is_empty() {
                continue;
            }

            let start = cursors.get(&ordinal).copied().unwrap_or(0) % dirs.len();
            for step in 0..dirs.len() {
                let index = (start + step) % dirs.len();
                let dir = &dirs[index];
                if location.contains(dir.id()) && dir.available_bytes() >= size {
                    cursors.insert(ordinal, index + 1);
                    return Some(dir.id());
                }
            }
        }
        None
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::RoundRobin
    }
}
