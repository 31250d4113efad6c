use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Block identifier, assigned by the master before the block is created locally
pub type BlockId = u64;

/// Name of the per-dir subdirectory holding blocks under construction
pub const TEMP_BLOCK_DIR: &str = ".tmp";

/// Position of a storage dir: tier ordinal (0 = fastest) and index within the tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirId {
    pub tier: usize,
    pub index: usize,
}

impl DirId {
    pub fn new(tier: usize, index: usize) -> Self {
        Self { tier, index }
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {} dir {}", self.tier, self.index)
    }
}

/// Placement constraint, used both for allocation requests and eviction scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockStoreLocation {
    /// Any dir of any tier
    AnyTier,
    /// Any dir of the given tier
    AnyDirInTier(usize),
    /// Exactly one dir
    Dir(DirId),
}

impl BlockStoreLocation {
    pub fn any_tier() -> Self {
        Self::AnyTier
    }

    pub fn any_dir_in_tier(tier: usize) -> Self {
        Self::AnyDirInTier(tier)
    }

    pub fn dir(tier: usize, index: usize) -> Self {
        Self::Dir(DirId::new(tier, index))
    }

    /// Whether `dir` satisfies this constraint
    pub fn contains(&self, dir: DirId) -> bool {
        match *self {
            Self::AnyTier => true,
            Self::AnyDirInTier(tier) => dir.tier == tier,
            Self::Dir(id) => id == dir,
        }
    }

    /// Whether every dir matched by `self` is also matched by `other`
    pub fn belongs_to(&self, other: &BlockStoreLocation) -> bool {
        match (*self, *other) {
            (_, Self::AnyTier) => true,
            (Self::AnyDirInTier(a), Self::AnyDirInTier(b)) => a == b,
            (Self::Dir(id), Self::AnyDirInTier(b)) => id.tier == b,
            (Self::Dir(a), Self::Dir(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for BlockStoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyTier => write!(f, "any tier"),
            Self::AnyDirInTier(tier) => write!(f, "any dir in tier {}", tier),
            Self::Dir(id) => write!(f, "{}", id),
        }
    }
}

impl From<DirId> for BlockStoreLocation {
    fn from(id: DirId) -> Self {
        Self::Dir(id)
    }
}

/// Committed block: size is frozen, only the location may change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub size: u64,
    pub dir: DirId,
}

impl BlockMeta {
    pub fn new(block_id: BlockId, size: u64, dir: DirId) -> Self {
        Self {
            block_id,
            size,
            dir,
        }
    }

    /// Path of the block file below its dir root
    pub fn path(&self, dir_root: &Path) -> PathBuf {
        dir_root.join(self.block_id.to_string())
    }
}

/// Block under construction
///
/// `size` is the number of bytes written so far. `reserved` is the space held
/// against the dir and never drops below `size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempBlockMeta {
    pub block_id: BlockId,
    pub dir: DirId,
    pub size: u64,
    pub reserved: u64,
}

impl TempBlockMeta {
    /// New temp block with `initial_bytes` reserved and nothing written yet
    pub fn new(block_id: BlockId, dir: DirId, initial_bytes: u64) -> Self {
        Self {
            block_id,
            dir,
            size: 0,
            reserved: initial_bytes,
        }
    }

    pub fn path(&self, dir_root: &Path) -> PathBuf {
        dir_root.join(TEMP_BLOCK_DIR).join(self.block_id.to_string())
    }

    /// Extra reservation needed to hold `additional` more written bytes.
    ///
    /// `None` when the grown size would not fit in a `u64`.
    pub fn top_up_for(&self, additional: u64) -> Option<u64> {
        let grown = self.size.checked_add(additional)?;
        Some(grown.saturating_sub(self.reserved))
    }

    /// The committed form of this block
    pub fn to_committed(&self) -> BlockMeta {
        BlockMeta::new(self.block_id, self.size, self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_contains() {
        let dir = DirId::new(1, 2);
        assert!(BlockStoreLocation::AnyTier.contains(dir));
        assert!(BlockStoreLocation::AnyDirInTier(1).contains(dir));
        assert!(!BlockStoreLocation::AnyDirInTier(0).contains(dir));
        assert!(BlockStoreLocation::dir(1, 2).contains(dir));
        assert!(!BlockStoreLocation::dir(1, 0).contains(dir));
    }

    #[test]
    fn test_location_belongs_to() {
        let any = BlockStoreLocation::AnyTier;
        let tier1 = BlockStoreLocation::AnyDirInTier(1);
        let dir = BlockStoreLocation::dir(1, 0);

        assert!(dir.belongs_to(&tier1));
        assert!(dir.belongs_to(&any));
        assert!(tier1.belongs_to(&any));
        assert!(!any.belongs_to(&tier1));
        assert!(!tier1.belongs_to(&dir));
        assert!(!BlockStoreLocation::dir(0, 0).belongs_to(&tier1));
    }

    #[test]
    fn test_block_paths() {
        let root = Path::new("/mnt/ramdisk");
        let meta = BlockMeta::new(42, 10, DirId::new(0, 0));
        assert_eq!(meta.path(root), PathBuf::from("/mnt/ramdisk/42"));

        let temp = TempBlockMeta::new(42, DirId::new(0, 0), 10);
        assert_eq!(temp.path(root), PathBuf::from("/mnt/ramdisk/.tmp/42"));
    }

    #[test]
    fn test_temp_block_top_up() {
        let mut temp = TempBlockMeta::new(1, DirId::new(0, 0), 60);
        assert_eq!(temp.top_up_for(40), Some(0));
        assert_eq!(temp.top_up_for(70), Some(10));

        temp.size = 60;
        assert_eq!(temp.top_up_for(5), Some(5));
        assert_eq!(temp.top_up_for(u64::MAX), None);
        assert_eq!(temp.to_committed().size, 60);
    }
}
