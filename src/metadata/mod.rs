// ブロックメタデータ管理モジュール
pub mod types;
pub mod dir;
pub mod manager;

pub use types::{BlockId, BlockMeta, BlockStoreLocation, DirId, TempBlockMeta};
pub use dir::{DirSnapshot, StorageDir, StorageTier};
pub use manager::{BlockMetadataManager, CapacityReport, StoreView, TierCapacity};
