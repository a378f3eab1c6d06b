//! Hook delivery.
//!
//! Tasks are buffered per repository and drained by a [`UniqueQueue`] keyed by
//! repository id, so each repository has at most one delivery run in flight
//! and its tasks go out in order. Every task is POSTed to each endpoint
//! registered for its repository; transient failures are retried with
//! backoff, permanent ones are logged and dropped.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

use crate::queue::{Enqueued, UniqueQueue};
use crate::retry::{RetryConfig, RetryResult, Retryable, retry_with_backoff};
use crate::types::RepoId;

use super::payload::HookEventType;
use super::signature::{SIGNATURE_HEADER, sign_payload};

/// Header naming the event type of a delivery.
pub const EVENT_HEADER: &str = "X-Merge-Readiness-Event";

/// Header carrying a per-process delivery sequence number.
pub const DELIVERY_HEADER: &str = "X-Merge-Readiness-Delivery";

/// A translated payload waiting to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct HookTask {
    pub repo_id: RepoId,
    pub event: HookEventType,
    pub payload: serde_json::Value,
}

/// One serialized delivery attempt.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: u64,
    pub event: HookEventType,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Worth retrying: network failure, 5xx, 429.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying will not help: any other non-success status.
    #[error("delivery rejected: {0}")]
    Permanent(String),
}

impl Retryable for DeliveryError {
    fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

impl DeliveryError {
    /// Classifies an HTTP status. `None` means success.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 | 500..=599 => Some(DeliveryError::Transient(format!("HTTP {}", status))),
            other => Some(DeliveryError::Permanent(format!("HTTP {}", other))),
        }
    }
}

// ─── Endpoints ───

/// A subscriber URL registered on a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookEndpoint {
    pub url: String,

    /// Signing secret; deliveries are unsigned without one.
    #[serde(default)]
    pub secret: Option<String>,

    /// Event types to deliver. Empty means all.
    #[serde(default)]
    pub events: Vec<HookEventType>,
}

impl HookEndpoint {
    pub fn wants(&self, event: HookEventType) -> bool {
        self.events.is_empty() || self.events.contains(&event)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepoHooks {
    repo_id: RepoId,
    endpoints: Vec<HookEndpoint>,
}

/// Endpoints by repository, loaded from the hooks file.
///
/// The file is a JSON list of `{repo_id, endpoints: [{url, secret?, events?}]}`.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    by_repo: HashMap<RepoId, Vec<HookEndpoint>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        let entries: Vec<RepoHooks> = serde_json::from_slice(bytes)?;
        let mut registry = HookRegistry::new();
        for entry in entries {
            for endpoint in entry.endpoints {
                registry.register(entry.repo_id, endpoint);
            }
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes).map_err(std::io::Error::other)
    }

    pub fn register(&mut self, repo: RepoId, endpoint: HookEndpoint) {
        self.by_repo.entry(repo).or_default().push(endpoint);
    }

    pub fn endpoints(&self, repo: RepoId) -> &[HookEndpoint] {
        self.by_repo.get(&repo).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn repo_count(&self) -> usize {
        self.by_repo.len()
    }
}

// ─── Sending ───

/// Sends one delivery to one endpoint.
#[async_trait]
pub trait HookSender: Send + Sync {
    async fn send(&self, endpoint: &HookEndpoint, delivery: &Delivery) -> Result<(), DeliveryError>;
}

/// Sends deliveries as JSON POSTs.
pub struct HttpHookSender {
    client: reqwest::Client,
}

impl HttpHookSender {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("merge-readiness/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpHookSender { client })
    }
}

#[async_trait]
impl HookSender for HttpHookSender {
    async fn send(&self, endpoint: &HookEndpoint, delivery: &Delivery) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&endpoint.url)
            .header(CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, delivery.event.as_str())
            .header(DELIVERY_HEADER, delivery.id.to_string())
            .body(delivery.body.clone());
        if let Some(secret) = &endpoint.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(&delivery.body, secret.as_bytes()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;
        match DeliveryError::from_status(response.status().as_u16()) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

// ─── Queue ───

struct HookQueueInner {
    queue: UniqueQueue<RepoId>,
    pending: Mutex<HashMap<RepoId, VecDeque<HookTask>>>,
    sender: Arc<dyn HookSender>,
    registry: HookRegistry,
    retry: RetryConfig,
    next_id: AtomicU64,
}

/// Per-repository delivery queue. Clones share the same queue.
#[derive(Clone)]
pub struct HookQueue {
    inner: Arc<HookQueueInner>,
}

impl HookQueue {
    pub fn new(
        sender: Arc<dyn HookSender>,
        registry: HookRegistry,
        capacity: usize,
        retry: RetryConfig,
    ) -> Self {
        HookQueue {
            inner: Arc::new(HookQueueInner {
                queue: UniqueQueue::new("hooks", capacity),
                pending: Mutex::new(HashMap::new()),
                sender,
                registry,
                retry,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Buffer `task` and make sure its repository has a delivery run coming.
    pub async fn add(&self, task: HookTask) -> Enqueued {
        let repo = task.repo_id;
        self.inner.pending().entry(repo).or_default().push_back(task);

        let inner = Arc::clone(&self.inner);
        let enqueued = self
            .inner
            .queue
            .add(repo, || {}, move || async move { inner.deliver_all(repo).await })
            .await;
        if enqueued == Enqueued::Closed {
            self.inner.unbuffer_last(repo);
            warn!(repo = %repo, "hook queue closed, task dropped");
        }
        enqueued
    }

    /// Tasks buffered for `repo` and not yet picked up.
    pub fn pending(&self, repo: RepoId) -> usize {
        self.inner.pending().get(&repo).map_or(0, VecDeque::len)
    }

    /// Stop accepting tasks and wait for running deliveries.
    pub async fn drain(&self) {
        self.inner.queue.drain().await;
    }
}

impl HookQueueInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<RepoId, VecDeque<HookTask>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Undo the buffering of a task the queue refused.
    fn unbuffer_last(&self, repo: RepoId) {
        let mut pending = self.pending();
        if let Some(tasks) = pending.get_mut(&repo) {
            tasks.pop_back();
            if tasks.is_empty() {
                pending.remove(&repo);
            }
        }
    }

    fn next_task(&self, repo: RepoId) -> Option<HookTask> {
        let mut pending = self.pending();
        let task = pending.get_mut(&repo).and_then(VecDeque::pop_front);
        if task.is_none() {
            pending.remove(&repo);
        }
        task
    }

    #[instrument(skip_all, fields(repo = %repo))]
    async fn deliver_all(&self, repo: RepoId) {
        while let Some(task) = self.next_task(repo) {
            self.deliver(task).await;
        }
    }

    async fn deliver(&self, task: HookTask) {
        let endpoints: Vec<&HookEndpoint> = self
            .registry
            .endpoints(task.repo_id)
            .iter()
            .filter(|e| e.wants(task.event))
            .collect();
        if endpoints.is_empty() {
            trace!(event = %task.event, "no endpoints subscribed");
            return;
        }

        let body = match serde_json::to_vec(&task.payload) {
            Ok(body) => body,
            Err(e) => {
                error!(event = %task.event, error = %e, "cannot serialize payload");
                return;
            }
        };
        let delivery = Delivery {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            event: task.event,
            body,
        };

        for endpoint in endpoints {
            let result = retry_with_backoff(self.retry, || {
                self.sender.send(endpoint, &delivery)
            })
            .await;
            match result {
                RetryResult::Success(()) => {
                    debug!(delivery = delivery.id, event = %delivery.event, url = %endpoint.url, "delivered");
                }
                RetryResult::ExhaustedRetries { last_error, attempts } => {
                    warn!(delivery = delivery.id, url = %endpoint.url, attempts, error = %last_error, "delivery gave up");
                }
                RetryResult::PermanentError(e) => {
                    warn!(delivery = delivery.id, url = %endpoint.url, error = %e, "delivery rejected, dropping");
                }
            }
        }
    }
}
