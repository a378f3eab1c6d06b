//! Outbound event channel.
//!
//! Business logic holds a [`Notifier`] and calls [`Notifier::notify`], which
//! never blocks and never fails the caller. A single [`NotifierWorker`] drains
//! the channel, translates each event and hands the results to the
//! [`HookQueue`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::state::PullStore;

use super::delivery::HookQueue;
use super::events::DomainEvent;
use super::translator::Translator;

/// Sending half of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Notifier { tx }, rx)
    }

    /// Queue `event` for translation. Dropped with a warning after shutdown.
    pub fn notify(&self, event: DomainEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            warn!(event = event.kind(), "notifier closed, dropping event");
        }
    }
}

/// Drains the event channel into the hook queue.
pub struct NotifierWorker {
    rx: mpsc::UnboundedReceiver<DomainEvent>,
    translator: Translator,
    store: Arc<dyn PullStore>,
    hooks: HookQueue,
}

impl NotifierWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<DomainEvent>,
        translator: Translator,
        store: Arc<dyn PullStore>,
        hooks: HookQueue,
    ) -> Self {
        NotifierWorker {
            rx,
            translator,
            store,
            hooks,
        }
    }

    /// Runs until `shutdown` fires or every [`Notifier`] is dropped.
    ///
    /// On shutdown, events already in the channel are still translated.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    self.rx.close();
                    while let Ok(event) = self.rx.try_recv() {
                        self.handle(event).await;
                    }
                    break;
                }
            }
        }
        info!("notifier stopped");
    }

    async fn handle(&self, event: DomainEvent) {
        let tasks = match self.translator.translate(&event, self.store.as_ref()) {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(event = event.kind(), error = %e, "failed to translate event");
                return;
            }
        };
        debug!(event = event.kind(), tasks = tasks.len(), "translated event");
        for task in tasks {
            self.hooks.add(task).await;
        }
    }
}
