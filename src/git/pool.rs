//! Per-repository mutual exclusion.
//!
//! Patch tests and merge detection for pull requests targeting the same base
//! repository share that repository's object store and must not run
//! concurrently. Different repositories proceed in parallel.
//!
//! Entries are created on demand and removed when the last holder or waiter
//! lets go, so the table only ever contains repositories with work in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use crate::types::RepoId;

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Clone, Default)]
pub struct RepoWorkingPool {
    slots: Arc<Mutex<HashMap<RepoId, Slot>>>,
}

/// Exclusive access to one repository. Released on drop.
#[derive(Debug)]
pub struct RepoGuard {
    repo: RepoId,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<HashMap<RepoId, Slot>>>,
}

impl RepoWorkingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder has `repo`, then takes it.
    ///
    /// Dropping the returned future while it waits leaves the table as if
    /// the call never happened.
    pub async fn acquire(&self, repo: RepoId) -> RepoGuard {
        let mut waiting = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Waiting {
                repo,
                slot: Arc::clone(slots.entry(repo).or_default()),
                slots: Arc::clone(&self.slots),
                acquired: false,
            }
        };

        let guard = Arc::clone(&waiting.slot).lock_owned().await;
        waiting.acquired = true;
        trace!(repo = %repo, "acquired repository lock");

        RepoGuard {
            repo,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of repositories currently held or awaited.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A pending `acquire`. Removes the table entry if the wait is abandoned
/// and nobody else uses the slot.
struct Waiting {
    repo: RepoId,
    slot: Slot,
    slots: Arc<Mutex<HashMap<RepoId, Slot>>>,
    acquired: bool,
}

impl Drop for Waiting {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // The table and this waiter are the only references left.
        if let Some(slot) = slots.get(&self.repo)
            && Arc::ptr_eq(slot, &self.slot)
            && Arc::strong_count(slot) == 2
        {
            slots.remove(&self.repo);
        }
        trace!(repo = %self.repo, "abandoned wait for repository lock");
    }
}

impl Drop for RepoGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Drop the async guard while holding the table lock so no new waiter
        // can clone the slot between the release and the count check.
        self.guard.take();
        if let Some(slot) = slots.get(&self.repo)
            && Arc::strong_count(slot) == 1
        {
            slots.remove(&self.repo);
        }
        trace!(repo = %self.repo, "released repository lock");
    }
}
