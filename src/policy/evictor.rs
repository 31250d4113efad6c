//! Eviction strategies
//!
//! An evictor turns a space deficit into an [`EvictionPlan`]: the blocks to
//! drop or demote so one dir inside the requested location ends up with enough
//! available bytes. Planning reads a [`StoreView`] and a snapshot of the locked
//! blocks; it never mutates anything, and the same inputs always yield the
//! same plan.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::metadata::dir::StorageDir;
use crate::metadata::manager::StoreView;
use crate::metadata::types::{BlockId, BlockMeta, BlockStoreLocation, DirId};
use crate::storage::error::{StoreError, StoreResult};

/// What to do with a victim block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionAction {
    /// Delete the block
    Evict,
    /// Demote the block into a slower dir
    MoveTo(DirId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub block_id: BlockId,
    pub size: u64,
    pub from: DirId,
    pub action: EvictionAction,
}

/// Ordered victim list that frees `target` enough for the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPlan {
    pub target: DirId,
    pub actions: Vec<PlannedAction>,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn bytes_freed(&self) -> u64 {
        self.actions.iter().map(|a| a.size).sum()
    }
}

/// Reclamation strategy
pub trait Evictor: Send + Sync {
    /// Plan how to get `size` available bytes into one dir of `location`,
    /// never touching a block in `locked`.
    fn free_space(
        &self,
        view: &StoreView,
        size: u64,
        location: &BlockStoreLocation,
        locked: &HashSet<BlockId>,
    ) -> StoreResult<EvictionPlan>;

    fn kind(&self) -> EvictorKind;
}

/// Evictor selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictorKind {
    /// Least recently used blocks first
    #[default]
    Lru,
    /// Lowest block ids first, ignoring recency
    Greedy,
}

impl EvictorKind {
    pub fn build(self, demote: bool) -> Box<dyn Evictor> {
        match self {
            Self::Lru => Box::new(LruEvictor::new(demote)),
            Self::Greedy => Box::new(GreedyEvictor::new(demote)),
        }
    }
}

/// Shared planning loop; `order` yields a dir's candidates in victim order.
fn plan<'a, F, I>(
    view: &'a StoreView,
    size: u64,
    location: &BlockStoreLocation,
    locked: &HashSet<BlockId>,
    demote: bool,
    order: F,
) -> StoreResult<EvictionPlan>
where
    F: Fn(&'a StorageDir) -> I,
    I: Iterator<Item = &'a BlockMeta>,
{
    if !view.is_valid(location) {
        return Err(StoreError::InvalidLocation(*location));
    }

    for dir in view.dirs_in(*location) {
        if dir.capacity_bytes() < size {
            continue;
        }

        let mut available = dir.available_bytes();
        let mut victims = Vec::new();
        for meta in order(dir) {
            if available >= size {
                break;
            }
            if locked.contains(&meta.block_id) {
                continue;
            }
            available += meta.size;
            victims.push(meta);
        }
        if available < size {
            continue;
        }

        // Bytes already promised to each demotion target by this plan
        let mut pending: HashMap<DirId, u64> = HashMap::new();
        let actions = victims
            .into_iter()
            .map(|meta| {
                let action = if demote {
                    demotion_target(view, dir.id(), meta.size, &pending)
                        .map(|dest| {
                            *pending.entry(dest).or_default() += meta.size;
                            EvictionAction::MoveTo(dest)
                        })
                        .unwrap_or(EvictionAction::Evict)
                } else {
                    EvictionAction::Evict
                };
                PlannedAction {
                    block_id: meta.block_id,
                    size: meta.size,
                    from: dir.id(),
                    action,
                }
            })
            .collect();

        return Ok(EvictionPlan {
            target: dir.id(),
            actions,
        });
    }

    Err(StoreError::out_of_space(size, *location))
}

/// First dir in a strictly slower tier with room for `size` more bytes
fn demotion_target(
    view: &StoreView,
    from: DirId,
    size: u64,
    pending: &HashMap<DirId, u64>,
) -> Option<DirId> {
    view.dirs()
        .filter(|dir| dir.id().tier > from.tier)
        .find(|dir| {
            let promised = pending.get(&dir.id()).copied().unwrap_or(0);
            dir.available_bytes().saturating_sub(promised) >= size
        })
        .map(|dir| dir.id())
}

/// Least-recently-used evictor
///
/// Walks each candidate dir from its coldest block. Blocks that were never
/// accessed after landing in the dir keep insertion order, so the oldest
/// goes first.
pub struct LruEvictor {
    demote: bool,
}

impl LruEvictor {
    pub fn new(demote: bool) -> Self {
        Self { demote }
    }
}

impl Evictor for LruEvictor {
    fn free_space(
        &self,
        view: &StoreView,
        size: u64,
        location: &BlockStoreLocation,
        locked: &HashSet<BlockId>,
    ) -> StoreResult<EvictionPlan> {
        plan(view, size, location, locked, self.demote, |dir| {
            dir.blocks_lru()
        })
    }

    fn kind(&self) -> EvictorKind {
        EvictorKind::Lru
    }
}

/// Evicts the lowest block ids of a dir first
pub struct GreedyEvictor {
    demote: bool,
}

impl GreedyEvictor {
    pub fn new(demote: bool) -> Self {
        Self { demote }
    }
}

impl Evictor for GreedyEvictor {
    fn free_space(
        &self,
        view: &StoreView,
        size: u64,
        location: &BlockStoreLocation,
        locked: &HashSet<BlockId>,
    ) -> StoreResult<EvictionPlan> {
        plan(view, size, location, locked, self.demote, |dir| {
            let mut blocks: Vec<&BlockMeta> = dir.blocks_lru().collect();
            blocks.sort_by_key(|meta| meta.block_id);
            blocks.into_iter()
        })
    }

    fn kind(&self) -> EvictorKind {
        EvictorKind::Greedy
    }
}
