// ブロックストア層モジュール
pub mod error;
pub mod tiered_store;

pub use error::{StoreError, StoreResult};
pub use tiered_store::TieredBlockStore;
