//! Keyed task queue that collapses duplicate work.
//!
//! At most one job per key is queued or running at any time. Triggers that
//! arrive while a key is queued are no-ops: the queued job has not started and
//! will observe the latest state. Triggers that arrive while a key's job is
//! already running register a single follow-up run instead, because the
//! running job may have read state that is now stale. Any number of such
//! triggers collapse into that one follow-up.
//!
//! Capacity bounds the number of distinct keys with work outstanding. Adding
//! a brand-new key to a full queue waits for a slot rather than dropping the
//! work.
//!
//! ```text
//!   add(k) ──► [absent] ──permit──► Pending ──start──► Running ──done──► [absent]
//!                                     ▲                  │  add(k)
//!                                     │                  ▼
//!                                     └──── start ── Running + follow-up
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type JobFactory = Box<dyn FnOnce() -> Job + Send + 'static>;

/// What `add` did with the submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new run was scheduled for the key.
    Scheduled,

    /// A run for the key was already queued; the job was dropped.
    AlreadyPending,

    /// The key's job is running; this job will run right after it.
    Deferred,

    /// The queue is shut down; the job was dropped.
    Closed,
}

impl Enqueued {
    /// Returns true if the submitted job will run.
    pub fn accepted(&self) -> bool {
        matches!(self, Enqueued::Scheduled | Enqueued::Deferred)
    }
}

enum Slot {
    Pending,
    Running { follow_up: Option<JobFactory> },
}

struct Inner<K> {
    name: &'static str,
    slots: Mutex<HashMap<K, Slot>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl<K> Inner<K> {
    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A bounded, deduplicating task queue. Clones share the same queue.
pub struct UniqueQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for UniqueQueue<K> {
    fn clone(&self) -> Self {
        UniqueQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn box_job<F, Fut>(job: F) -> JobFactory
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || Box::pin(job()) as Job)
}

impl<K> UniqueQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
{
    /// Creates a queue admitting at most `capacity` distinct keys at once.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        UniqueQueue {
            inner: Arc::new(Inner {
                name,
                slots: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(capacity.max(1))),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Submit `job` for `key`.
    ///
    /// `on_accept` runs exactly when the job is accepted (`Scheduled` or
    /// `Deferred`), while the queue's table is locked, so no other submission
    /// or [`commit_if_latest`](Self::commit_if_latest) for the key can
    /// interleave with it.
    ///
    /// Waits only when the key is new and the queue is at capacity.
    pub async fn add<A, F, Fut>(&self, key: K, on_accept: A, job: F) -> Enqueued
    where
        A: FnOnce() + Send,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            return Enqueued::Closed;
        }

        {
            let mut slots = self.inner.slots();
            if let Some(slot) = slots.get_mut(&key) {
                return self.join_existing(&key, slot, on_accept, job);
            }
        }

        let permit = tokio::select! {
            permit = Arc::clone(&self.inner.permits).acquire_owned() => permit,
            _ = self.inner.shutdown.cancelled() => return Enqueued::Closed,
        };
        let Ok(permit) = permit else {
            return Enqueued::Closed;
        };

        {
            let mut slots = self.inner.slots();
            // Another submitter may have claimed the key while we waited.
            if let Some(slot) = slots.get_mut(&key) {
                return self.join_existing(&key, slot, on_accept, job);
            }
            if self.inner.shutdown.is_cancelled() {
                return Enqueued::Closed;
            }
            slots.insert(key.clone(), Slot::Pending);
            on_accept();
        }

        trace!(queue = self.inner.name, key = ?key, "scheduled");
        self.spawn(key, box_job(job), permit);
        Enqueued::Scheduled
    }

    fn join_existing<A, F, Fut>(&self, key: &K, slot: &mut Slot, on_accept: A, job: F) -> Enqueued
    where
        A: FnOnce(),
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match slot {
            Slot::Pending | Slot::Running { follow_up: Some(_) } => {
                trace!(queue = self.inner.name, key = ?key, "already pending");
                Enqueued::AlreadyPending
            }
            Slot::Running { follow_up } => {
                on_accept();
                *follow_up = Some(box_job(job));
                trace!(queue = self.inner.name, key = ?key, "deferred behind running job");
                Enqueued::Deferred
            }
        }
    }

    fn spawn(&self, key: K, job: JobFactory, permit: OwnedSemaphorePermit) {
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            // Held until the key's last follow-up finishes.
            let _permit = permit;
            let mut next = Some(job);

            while let Some(factory) = next.take() {
                inner
                    .slots()
                    .insert(key.clone(), Slot::Running { follow_up: None });

                // A panicking job must not leave its key stuck.
                if let Err(e) = tokio::spawn(factory()).await {
                    error!(queue = inner.name, key = ?key, error = %e, "job panicked");
                }

                let mut slots = inner.slots();
                if let Some(Slot::Running { follow_up }) = slots.get_mut(&key) {
                    next = follow_up.take();
                }
                if next.is_none() {
                    slots.remove(&key);
                }
            }
            debug!(queue = inner.name, key = ?key, "finished");
        });
    }

    /// Returns true while a job for `key` is queued or running.
    pub fn exist(&self, key: &K) -> bool {
        self.inner.slots().contains_key(key)
    }

    /// Returns true if a run for `key` is queued that has not started yet.
    pub fn has_newer(&self, key: &K) -> bool {
        matches!(
            self.inner.slots().get(key),
            Some(Slot::Pending | Slot::Running { follow_up: Some(_) })
        )
    }

    /// Runs `commit` unless a newer run for `key` has been scheduled.
    ///
    /// Called by a finishing job to publish its result. The check and the
    /// commit happen under the table lock, so a submission cannot slip in
    /// between them: either the submission lands first and the commit is
    /// skipped, or the commit lands first and the submission's `on_accept`
    /// overrides it.
    pub fn commit_if_latest<R>(&self, key: &K, commit: impl FnOnce() -> R) -> Option<R> {
        let slots = self.inner.slots();
        let newer = matches!(
            slots.get(key),
            Some(Slot::Pending | Slot::Running { follow_up: Some(_) })
        );
        if newer {
            trace!(queue = self.inner.name, key = ?key, "newer run pending, skipping commit");
            return None;
        }
        Some(commit())
    }

    /// Number of keys with work queued or running.
    pub fn len(&self) -> usize {
        self.inner.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting new work. Accepted jobs, including follow-ups, still run.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Closes the queue and waits for every accepted job to finish.
    pub async fn drain(&self) {
        self.close();
        self.inner.tracker.wait().await;
        debug!(queue = self.inner.name, "drained");
    }
}
