//! Placement and reclamation policies
//!
//! Both strategy families are closed sets chosen from configuration at
//! construction time.

pub mod allocator;
pub mod evictor;

pub use allocator::{Allocator, AllocatorKind, GreedyAllocator, MaxFreeAllocator, RoundRobinAllocator};
pub use evictor::{
    EvictionAction, EvictionPlan, Evictor, EvictorKind, GreedyEvictor, LruEvictor, PlannedAction,
};
