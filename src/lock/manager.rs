use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metadata::types::BlockId;
use crate::storage::error::{StoreError, StoreResult};

/// Identifier of one granted lock
pub type LockId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Holders of one block's lock
#[derive(Debug, Default)]
struct BlockLockState {
    shared: usize,
    exclusive: bool,
    /// Exclusive requests currently blocked; new shared requests queue behind them
    exclusive_waiters: usize,
}

impl BlockLockState {
    fn is_held(&self) -> bool {
        self.shared > 0 || self.exclusive
    }

    fn is_idle(&self) -> bool {
        !self.is_held() && self.exclusive_waiters == 0
    }

    fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive && self.exclusive_waiters == 0,
            LockMode::Exclusive => !self.is_held(),
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared += 1,
            LockMode::Exclusive => self.exclusive = true,
        }
    }
}

#[derive(Default)]
struct LockTableInner {
    blocks: HashMap<BlockId, BlockLockState>,
    holders: HashMap<LockId, (BlockId, LockMode)>,
    next_lock_id: LockId,
}

impl LockTableInner {
    fn grant(&mut self, block_id: BlockId, mode: LockMode) -> LockId {
        self.blocks.entry(block_id).or_default().grant(mode);
        self.next_lock_id += 1;
        let lock_id = self.next_lock_id;
        self.holders.insert(lock_id, (block_id, mode));
        lock_id
    }

    fn admits(&self, block_id: BlockId, mode: LockMode) -> bool {
        self.blocks
            .get(&block_id)
            .map_or(true, |state| state.admits(mode))
    }

    fn drop_if_idle(&mut self, block_id: BlockId) {
        if self.blocks.get(&block_id).is_some_and(BlockLockState::is_idle) {
            self.blocks.remove(&block_id);
        }
    }
}

struct LockTable {
    inner: Mutex<LockTableInner>,
    released: Condvar,
}

impl LockTable {
    fn release(&self, lock_id: LockId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let (block_id, mode) = inner
            .holders
            .remove(&lock_id)
            .ok_or(StoreError::InvalidLockHandle(lock_id))?;

        if let Some(state) = inner.blocks.get_mut(&block_id) {
            match mode {
                LockMode::Shared => state.shared -= 1,
                LockMode::Exclusive => state.exclusive = false,
            }
        }
        inner.drop_if_idle(block_id);
        drop(inner);

        self.released.notify_all();
        Ok(())
    }
}

/// Proof of a held block lock
///
/// Not `Clone`: a lock is given back exactly once, either through
/// [`LockManager::unlock`] or by dropping the handle.
#[must_use = "dropping a LockHandle releases the lock immediately"]
pub struct LockHandle {
    lock_id: LockId,
    block_id: BlockId,
    mode: LockMode,
    table: Option<Arc<LockTable>>,
}

impl LockHandle {
    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("lock_id", &self.lock_id)
            .field("block_id", &self.block_id)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            if let Err(e) = table.release(self.lock_id) {
                tracing::warn!("Failed to release lock on block {}: {}", self.block_id, e);
            }
        }
    }
}

/// Per-block shared/exclusive locks
///
/// Shared holders coexist; an exclusive holder excludes everyone else. Once
/// an exclusive request is waiting, new shared requests wait behind it so
/// writers are not starved by a stream of readers.
pub struct LockManager {
    table: Arc<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Arc::new(LockTable {
                inner: Mutex::new(LockTableInner::default()),
                released: Condvar::new(),
            }),
        }
    }

    fn handle(&self, lock_id: LockId, block_id: BlockId, mode: LockMode) -> LockHandle {
        LockHandle {
            lock_id,
            block_id,
            mode,
            table: Some(self.table.clone()),
        }
    }

    /// Block until the lock is compatible with current holders.
    ///
    /// With `timeout` set, gives up with `LockTimeout` once it elapses and
    /// leaves the table as it was.
    pub fn lock_block(
        &self,
        block_id: BlockId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> StoreResult<LockHandle> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.table.inner.lock();

        if inner.admits(block_id, mode) {
            let lock_id = inner.grant(block_id, mode);
            return Ok(self.handle(lock_id, block_id, mode));
        }

        if mode == LockMode::Exclusive {
            inner.blocks.entry(block_id).or_default().exclusive_waiters += 1;
        }

        let granted = loop {
            match deadline {
                Some(deadline) => {
                    let timed_out = self.table.released.wait_until(&mut inner, deadline).timed_out();
                    if Self::admits_as_waiter(&inner, block_id, mode) {
                        break true;
                    }
                    if timed_out {
                        break false;
                    }
                }
                None => {
                    self.table.released.wait(&mut inner);
                    if Self::admits_as_waiter(&inner, block_id, mode) {
                        break true;
                    }
                }
            }
        };

        if mode == LockMode::Exclusive {
            if let Some(state) = inner.blocks.get_mut(&block_id) {
                state.exclusive_waiters -= 1;
            }
        }

        if !granted {
            inner.drop_if_idle(block_id);
            drop(inner);
            // Shared waiters may have been queued behind this request.
            self.table.released.notify_all();
            return Err(StoreError::LockTimeout {
                block_id,
                waited: timeout.unwrap_or_default(),
            });
        }

        let lock_id = inner.grant(block_id, mode);
        Ok(self.handle(lock_id, block_id, mode))
    }

    /// A waiting exclusive request counts itself in `exclusive_waiters`
    fn admits_as_waiter(inner: &LockTableInner, block_id: BlockId, mode: LockMode) -> bool {
        match inner.blocks.get(&block_id) {
            None => true,
            Some(state) => match mode {
                LockMode::Shared => state.admits(mode),
                LockMode::Exclusive => !state.is_held(),
            },
        }
    }

    /// Take the lock only if it is free right now
    pub fn try_lock_block(&self, block_id: BlockId, mode: LockMode) -> Option<LockHandle> {
        let mut inner = self.table.inner.lock();
        if !inner.admits(block_id, mode) {
            return None;
        }
        let lock_id = inner.grant(block_id, mode);
        Some(self.handle(lock_id, block_id, mode))
    }

    /// Release a lock handed out by this manager
    pub fn unlock(&self, mut handle: LockHandle) -> StoreResult<()> {
        let Some(table) = handle.table.take() else {
            return Err(StoreError::InvalidLockHandle(handle.lock_id));
        };
        if !Arc::ptr_eq(&table, &self.table) {
            handle.table = Some(table);
            return Err(StoreError::InvalidLockHandle(handle.lock_id));
        }
        table.release(handle.lock_id)
    }

    /// Check that `handle` is a live lock of this manager in `mode`.
    ///
    /// An exclusive handle also satisfies a shared requirement.
    pub fn check_held(&self, handle: &LockHandle, mode: LockMode) -> StoreResult<()> {
        let ours = handle
            .table
            .as_ref()
            .is_some_and(|table| Arc::ptr_eq(table, &self.table));
        let held = ours
            && self
                .table
                .inner
                .lock()
                .holders
                .get(&handle.lock_id)
                .is_some_and(|(block_id, held_mode)| {
                    *block_id == handle.block_id
                        && (mode == LockMode::Shared || *held_mode == LockMode::Exclusive)
                });
        if held {
            Ok(())
        } else {
            Err(StoreError::InvalidLockHandle(handle.lock_id))
        }
    }

    /// Whether any lock is currently held on `block_id`.
    ///
    /// This is a snapshot: the answer may be stale by the time it is used.
    pub fn is_locked(&self, block_id: BlockId) -> bool {
        self.table
            .inner
            .lock()
            .blocks
            .get(&block_id)
            .is_some_and(BlockLockState::is_held)
    }

    /// Snapshot of every block with at least one holder
    pub fn locked_blocks(&self) -> HashSet<BlockId> {
        self.table
            .inner
            .lock()
            .blocks
            .iter()
            .filter(|(_, state)| state.is_held())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of locks currently granted, across all blocks
    pub fn held_count(&self) -> usize {
        self.table.inner.lock().holders.len()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const SHORT: Option<Duration> = Some(Duration::from_millis(50));

    #[test]
    fn test_shared_locks_coexist() {
        let locks = LockManager::new();
        let a = locks.lock_block(1, LockMode::Shared, SHORT).unwrap();
        let b = locks.lock_block(1, LockMode::Shared, SHORT).unwrap();
        assert!(locks.is_locked(1));
        assert_eq!(locks.held_count(), 2);

        locks.unlock(a).unwrap();
        assert!(locks.is_locked(1));
        locks.unlock(b).unwrap();
        assert!(!locks.is_locked(1));
    }

    #[test]
    fn test_exclusive_excludes_everything() {
        let locks = LockManager::new();
        let w = locks.lock_block(1, LockMode::Exclusive, SHORT).unwrap();

        assert!(locks.try_lock_block(1, LockMode::Shared).is_none());
        assert!(locks.try_lock_block(1, LockMode::Exclusive).is_none());
        let err = locks.lock_block(1, LockMode::Shared, SHORT).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { block_id: 1, .. }));

        // Other blocks are unaffected
        let other = locks.try_lock_block(2, LockMode::Exclusive);
        assert!(other.is_some());

        locks.unlock(w).unwrap();
        assert!(locks.try_lock_block(1, LockMode::Exclusive).is_some());
    }

    #[test]
    fn test_shared_blocks_exclusive() {
        let locks = LockManager::new();
        let r = locks.lock_block(1, LockMode::Shared, SHORT).unwrap();
        let err = locks.lock_block(1, LockMode::Exclusive, SHORT).unwrap_err();
        assert!(err.is_retryable());
        drop(r);
        assert!(locks.lock_block(1, LockMode::Exclusive, SHORT).is_ok());
    }

    #[test]
    fn test_timeout_leaves_no_state() {
        let locks = LockManager::new();
        let r = locks.lock_block(1, LockMode::Shared, SHORT).unwrap();
        assert!(locks.lock_block(1, LockMode::Exclusive, SHORT).is_err());

        // The timed-out writer no longer blocks new readers
        let r2 = locks.try_lock_block(1, LockMode::Shared);
        assert!(r2.is_some());
        assert_eq!(locks.held_count(), 2);
        drop(r);
        drop(r2);
        assert!(locks.locked_blocks().is_empty());
    }

    #[test]
    fn test_drop_releases() {
        let locks = LockManager::new();
        {
            let _w = locks.lock_block(7, LockMode::Exclusive, None).unwrap();
            assert!(locks.is_locked(7));
        }
        assert!(!locks.is_locked(7));
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn test_unlock_foreign_handle_rejected() {
        let a = LockManager::new();
        let b = LockManager::new();
        let handle = a.lock_block(1, LockMode::Exclusive, None).unwrap();
        let lock_id = handle.lock_id();

        assert_eq!(b.unlock(handle), Err(StoreError::InvalidLockHandle(lock_id)));
        // The rejected handle was dropped and released on its own manager
        assert!(!a.is_locked(1));
    }

    #[test]
    fn test_check_held() {
        let a = LockManager::new();
        let b = LockManager::new();
        let w = a.lock_block(1, LockMode::Exclusive, None).unwrap();
        let r = a.lock_block(2, LockMode::Shared, None).unwrap();

        assert!(a.check_held(&w, LockMode::Exclusive).is_ok());
        assert!(a.check_held(&w, LockMode::Shared).is_ok());
        assert!(a.check_held(&r, LockMode::Shared).is_ok());
        assert_eq!(
            a.check_held(&r, LockMode::Exclusive),
            Err(StoreError::InvalidLockHandle(r.lock_id()))
        );
        assert_eq!(
            b.check_held(&w, LockMode::Exclusive),
            Err(StoreError::InvalidLockHandle(w.lock_id()))
        );
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let locks = Arc::new(LockManager::new());
        let w = locks.lock_block(1, LockMode::Exclusive, None).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let locks = locks.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let h = locks
                    .lock_block(1, LockMode::Shared, Some(Duration::from_secs(5)))
                    .unwrap();
                acquired.store(true, Ordering::SeqCst);
                locks.unlock(h).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        locks.unlock(w).unwrap();
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers() {
        let locks = Arc::new(LockManager::new());
        let r = locks.lock_block(1, LockMode::Shared, None).unwrap();

        let writer = {
            let locks = locks.clone();
            thread::spawn(move || {
                let h = locks
                    .lock_block(1, LockMode::Exclusive, Some(Duration::from_secs(5)))
                    .unwrap();
                thread::sleep(Duration::from_millis(20));
                locks.unlock(h).unwrap();
            })
        };

        // Wait for the writer to queue
        let start = Instant::now();
        while locks.try_lock_block(1, LockMode::Shared).is_some() {
            assert!(start.elapsed() < Duration::from_secs(5), "writer never queued");
            thread::sleep(Duration::from_millis(1));
        }

        locks.unlock(r).unwrap();
        writer.join().unwrap();
        assert!(locks.try_lock_block(1, LockMode::Shared).is_some());
    }
}
