use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};

/// The named advisory locks mirroring SQLite's own locking model. Each is
/// independently three-state (unlocked/shared/exclusive); callers coordinate
/// through them the same way SQLite connections coordinate through file
/// locks, except here it's all in-process, guarding the local on-disk state
/// against concurrent replication writers and local writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Pending,
    Shared,
    Reserved,
    Write,
    Ckpt,
    Recover,
    Read0,
    Read1,
    Read2,
    Read3,
    Read4,
    Dms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    Shared(u32),
    Exclusive,
}

impl Default for LockState {
    fn default() -> Self {
        LockState::Unlocked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct Inner {
    states: HashMap<LockKind, LockState>,
}

/// A DB's full set of named locks.
pub struct LockTable {
    inner: Mutex<Inner>,
    released: Notify,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                states: HashMap::new(),
            }),
            released: Notify::new(),
        }
    }

    fn try_acquire(&self, kind: LockKind, mode: LockMode) -> bool {
        let mut inner = self.inner.lock();
        let state = inner.states.entry(kind).or_default();
        match (*state, mode) {
            (LockState::Unlocked, LockMode::Shared) => {
                *state = LockState::Shared(1);
                true
            }
            (LockState::Shared(n), LockMode::Shared) => {
                *state = LockState::Shared(n + 1);
                true
            }
            (LockState::Unlocked, LockMode::Exclusive) => {
                *state = LockState::Exclusive;
                true
            }
            _ => false,
        }
    }

    fn release(&self, kind: LockKind, mode: LockMode) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.states.get_mut(&kind) {
            *state = match (*state, mode) {
                (LockState::Shared(1), LockMode::Shared) => LockState::Unlocked,
                (LockState::Shared(n), LockMode::Shared) if n > 1 => LockState::Shared(n - 1),
                (LockState::Exclusive, LockMode::Exclusive) => LockState::Unlocked,
                (other, _) => other,
            };
        }
        drop(inner);
        self.released.notify_waiters();
    }

    /// Acquires a single named lock, honouring `timeout`.
    pub async fn lock(&self, kind: LockKind, mode: LockMode, timeout: Duration) -> Result<LockGuard<'_>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_acquire(kind, mode) {
                return Ok(LockGuard {
                    table: self,
                    kind,
                    mode,
                });
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::AcquireTimeout);
            }
            let _ = tokio::time::timeout(remaining, self.released.notified()).await;
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a single named lock. Releasing is idempotent via `Drop`.
pub struct LockGuard<'a> {
    table: &'a LockTable,
    kind: LockKind,
    mode: LockMode,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.kind, self.mode);
    }
}

/// The combined guard returned by acquiring the write lock plus any ancillary
/// locks requested alongside it. Holding this guard is what both local and
/// replication writers use to serialize mutation of a DB's on-disk state.
pub struct WriteLockGuard<'a> {
    _guards: Vec<LockGuard<'a>>,
}

impl LockTable {
    /// Acquires the write lock plus every lock in `guard_set`, exclusively,
    /// within `timeout`. All-or-nothing: if any lock in the set can't be
    /// acquired before the deadline, every lock acquired so far is released.
    pub async fn acquire_write_lock(
        &self,
        guard_set: &[LockKind],
        timeout: Duration,
    ) -> Result<WriteLockGuard<'_>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut guards = Vec::with_capacity(guard_set.len() + 1);
        guards.push(self.lock_until(LockKind::Write, LockMode::Exclusive, deadline).await?);
        for kind in guard_set {
            guards.push(self.lock_until(*kind, LockMode::Exclusive, deadline).await?);
        }
        Ok(WriteLockGuard { _guards: guards })
    }

    async fn lock_until(
        &self,
        kind: LockKind,
        mode: LockMode,
        deadline: tokio::time::Instant,
    ) -> Result<LockGuard<'_>> {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.lock(kind, mode, remaining).await
    }
}
