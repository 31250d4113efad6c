use std::time::Duration;

use thiserror::Error;

use crate::metadata::types::{BlockId, BlockStoreLocation};

/// Errors returned by the tiered block store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("Block already exists: {0}")]
    BlockAlreadyExists(BlockId),

    #[error("Out of space: {requested} bytes requested in {location}")]
    OutOfSpace {
        requested: u64,
        location: BlockStoreLocation,
    },

    #[error("Timed out after {waited:?} waiting for lock on block {block_id}")]
    LockTimeout { block_id: BlockId, waited: Duration },

    #[error("Invalid state transition for block {block_id}: {reason}")]
    InvalidStateTransition { block_id: BlockId, reason: String },

    #[error("Invalid location: {0}")]
    InvalidLocation(BlockStoreLocation),

    #[error("Invalid lock handle: {0}")]
    InvalidLockHandle(u64),
}

impl StoreError {
    pub(crate) fn invalid_transition(block_id: BlockId, reason: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            block_id,
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_space(requested: u64, location: BlockStoreLocation) -> Self {
        Self::OutOfSpace {
            requested,
            location,
        }
    }

    /// Whether the I/O layer may retry the request later.
    ///
    /// Space and lock contention are transient; the remaining kinds are client
    /// protocol errors.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfSpace { .. } | Self::LockTimeout { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(StoreError::out_of_space(10, BlockStoreLocation::AnyTier).is_retryable());
        assert!(StoreError::LockTimeout {
            block_id: 1,
            waited: Duration::from_millis(5)
        }
        .is_retryable());
        assert!(!StoreError::BlockNotFound(1).is_retryable());
        assert!(!StoreError::BlockAlreadyExists(1).is_retryable());
        assert!(!StoreError::invalid_transition(1, "abort of committed block").is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = StoreError::out_of_space(50, BlockStoreLocation::AnyDirInTier(1));
        assert_eq!(
            err.to_string(),
            "Out of space: 50 bytes requested in any dir in tier 1"
        );
        assert_eq!(StoreError::BlockNotFound(7).to_string(), "Block not found: 7");
    }
}
