//! Remote store contract.
//!
//! The [`RemoteStore`] trait is everything the core needs from the network:
//! a bulk read, a change feed, and row mutations. Implementations hide the
//! transport; the core only sees rows and [`FeedMessage`]s.

use crate::{error::Result, Direction, FeedMessage, RecordId, SortKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Notify};

/// A row as delivered by the remote store.
pub type Row = serde_json::Value;

/// Column changes sent with a row update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChanges {
    #[serde(rename = "favori", skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
}

impl FieldChanges {
    pub fn favorite(value: bool) -> Self {
        Self {
            favorite: Some(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.favorite.is_none()
    }
}

type CancelHook = Box<dyn FnOnce() + Send>;

/// Cancels a feed subscription.
///
/// Cloneable and idempotent. Once cancelled, the [`Feed`] yields nothing
/// more, even for messages already queued.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    hook: Arc<Mutex<Option<CancelHook>>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` on the first cancellation, e.g. to stop a transport task.
    pub fn on_cancel(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
        self
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let hook = self
                .hook
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(hook) = hook {
                hook();
            }
            self.wake.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the handle is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Sender half handed to feed producers.
pub type FeedSender = mpsc::UnboundedSender<FeedMessage>;

/// A live change feed subscription.
#[derive(Debug)]
pub struct Feed {
    events: mpsc::UnboundedReceiver<FeedMessage>,
    cancel: CancelHandle,
}

impl Feed {
    pub fn new(events: mpsc::UnboundedReceiver<FeedMessage>, cancel: CancelHandle) -> Self {
        Self { events, cancel }
    }

    /// Create a feed and the sender that produces into it.
    pub fn channel() -> (FeedSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, CancelHandle::new()))
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next message, or `None` once cancelled or closed.
    pub async fn next(&mut self) -> Option<FeedMessage> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.events.recv() => message.filter(|_| !self.cancel.is_cancelled()),
        }
    }
}

/// Network-facing operations of the remote record store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read every row ordered by `order_by`. Fails with
    /// [`Error::Transport`](crate::Error::Transport).
    async fn load_all(&self, order_by: SortKey, direction: Direction) -> Result<Vec<Row>>;

    /// Open a change feed on `table`. Connection loss arrives as
    /// [`FeedMessage::Lost`] rather than a silent end of stream.
    async fn subscribe(&self, table: &str) -> Result<Feed>;

    /// Update one row. Fails with [`Error::Mutation`](crate::Error::Mutation).
    async fn mutate_one(&self, id: RecordId, changes: &FieldChanges) -> Result<()>;

    /// Update several rows in one call.
    async fn mutate_many(&self, ids: &[RecordId], changes: &FieldChanges) -> Result<()>;

    async fn delete_one(&self, id: RecordId) -> Result<()>;

    /// Delete several rows in one call.
    async fn delete_many(&self, ids: &[RecordId]) -> Result<()>;
}
