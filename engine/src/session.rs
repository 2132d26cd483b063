//! Session - a cache bound to a remote store.
//!
//! The session loads the collection, folds the change feed into the cache,
//! and drives optimistic mutations through their remote round trip. The
//! cache lock is only ever held for synchronous work, never across a
//! remote call.

use crate::adapter::{CancelHandle, Feed, FieldChanges, RemoteStore};
use crate::cache::{Mutation, MutationHandle, MutationStatus, ReconcilingCache, Subscription};
use crate::record::ingest_rows;
use crate::{error::Result, Direction, Error, FeedMessage, RecordId, RowSchema, Snapshot, SortKey};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A running feed pump started by [`Session::follow`].
#[derive(Debug)]
pub struct FeedTask {
    cancel: CancelHandle,
    join: JoinHandle<Result<()>>,
}

impl FeedTask {
    /// Stop delivering events. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the pump to stop.
    ///
    /// Returns [`Error::FeedLost`] if the connection dropped.
    pub async fn join(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| Error::FeedLost(format!("feed task aborted: {}", e)))?
    }
}

/// Rolls back a mutation whose round trip was abandoned before it resolved,
/// e.g. because the caller's future was dropped mid-request.
struct Unresolved<'a> {
    cache: &'a Mutex<ReconcilingCache>,
    resolved: &'a Notify,
    handle: MutationHandle,
    armed: bool,
}

impl<'a> Unresolved<'a> {
    fn new(cache: &'a Mutex<ReconcilingCache>, resolved: &'a Notify, handle: MutationHandle) -> Self {
        Self {
            cache,
            resolved,
            handle,
            armed: true,
        }
    }

    fn handle(&self) -> &MutationHandle {
        &self.handle
    }

    /// The round trip finished; resolution is up to the caller.
    fn disarm(&mut self) -> MutationHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for Unresolved<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = matches!(
            cache.status(&self.handle),
            Some(MutationStatus::Queued | MutationStatus::InFlight)
        );
        if pending {
            tracing::warn!(mutation = %self.handle.id(), "Mutation abandoned before it resolved");
            let _ = cache.rollback(&self.handle);
        }
        drop(cache);
        self.resolved.notify_waiters();
    }
}

/// A record cache bound to a [`RemoteStore`].
///
/// `S` may be unsized, so `Session<dyn RemoteStore>` works for callers that
/// pick the store at runtime.
pub struct Session<S: ?Sized> {
    store: Arc<S>,
    cache: Mutex<ReconcilingCache>,
    schema: RowSchema,
    order_by: SortKey,
    direction: Direction,
    resolved: Notify,
}

impl<S: RemoteStore + ?Sized> Session<S> {
    /// Bind a fresh cache to `store`, using the liquidation notice schema.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: Mutex::new(ReconcilingCache::new()),
            schema: RowSchema::entreprise(),
            order_by: SortKey::PublishedOn,
            direction: Direction::Desc,
            resolved: Notify::new(),
        }
    }

    /// Validate rows with `schema` and follow changes on its table.
    pub fn with_schema(mut self, schema: RowSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// Run `f` with exclusive access to the cache.
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut ReconcilingCache) -> R) -> R {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut cache)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.with_cache(|c| c.snapshot())
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.with_cache(|c| c.subscribe(listener))
    }

    /// Load the full collection and initialize the cache.
    ///
    /// Malformed rows are dropped with a warning. A transport failure leaves
    /// the cache uninitialized so the load can be retried.
    pub async fn load(&self) -> Result<Snapshot> {
        let rows = match self.store.load_all(self.order_by, self.direction).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Initial load failed");
                return Err(e);
            }
        };
        let records = ingest_rows(&self.schema, rows);
        self.with_cache(|c| c.initialize(records))
    }

    /// Discard the cache contents and load again.
    pub async fn reload(&self) -> Result<Snapshot> {
        self.with_cache(|c| c.reset());
        self.resolved.notify_waiters();
        self.load().await
    }

    /// Open the change feed for this session's table.
    pub async fn open_feed(&self) -> Result<Feed> {
        self.store.subscribe(&self.schema.table).await
    }

    /// Fold feed messages into the cache until the feed ends.
    ///
    /// Returns `Ok(())` after cancellation and [`Error::FeedLost`] when the
    /// connection drops or the producer goes away.
    pub async fn pump(&self, mut feed: Feed) -> Result<()> {
        while let Some(message) = feed.next().await {
            if let FeedMessage::Lost(reason) = message {
                tracing::error!(reason = %reason, "Change feed lost");
                return Err(Error::FeedLost(reason));
            }

            match message.into_event(&self.schema) {
                Ok(Some(event)) => {
                    tracing::trace!(id = event.record_id(), "Applying remote change");
                    self.with_cache(|c| c.apply(event));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Dropping malformed change"),
            }
        }

        if feed.is_cancelled() {
            tracing::debug!("Change feed cancelled");
            Ok(())
        } else {
            Err(Error::FeedLost("feed closed by producer".into()))
        }
    }

    /// Toggle the favorite flag of one record.
    pub async fn toggle_favorite(&self, id: RecordId) -> Result<Snapshot> {
        self.mutate(Mutation::toggle_favorite(id)).await
    }

    /// Set the favorite flag of several records.
    pub async fn set_favorite(&self, ids: &[RecordId], value: bool) -> Result<Snapshot> {
        self.mutate(Mutation::set_favorite(ids, value)).await
    }

    pub async fn delete(&self, id: RecordId) -> Result<Snapshot> {
        self.mutate(Mutation::delete(vec![id])).await
    }

    pub async fn delete_many(&self, ids: &[RecordId]) -> Result<Snapshot> {
        self.mutate(Mutation::delete(ids)).await
    }

    /// Apply `mutation` optimistically, send it, then confirm or roll back.
    ///
    /// On failure the local change is reverted and the error is reported as
    /// [`Error::Mutation`] naming the affected ids. Dropping the returned
    /// future before it resolves rolls the local change back as well.
    pub async fn mutate(&self, mutation: Mutation) -> Result<Snapshot> {
        let handle = self.with_cache(|c| c.begin_optimistic_mutation(mutation.clone()))?;
        let mut guard = Unresolved::new(&self.cache, &self.resolved, handle);

        self.wait_until_applied(guard.handle()).await?;
        let outcome = self.send(&mutation, guard.handle()).await;

        let handle = guard.disarm();
        let resolution = self.with_cache(|c| match &outcome {
            Ok(()) => match c.confirm(&handle) {
                Ok(()) => Ok(c.snapshot()),
                // Discarded by a reload while in flight; the store has the write.
                Err(Error::UnknownMutation(_)) => {
                    tracing::debug!(mutation = %handle.id(), "Confirmed mutation outlived a reload");
                    Ok(c.snapshot())
                }
                Err(e) => Err(e),
            },
            Err(_) => c.rollback(&handle),
        });
        self.resolved.notify_waiters();

        match outcome {
            Ok(()) => resolution,
            Err(e) => {
                let cause = match e {
                    Error::Mutation { cause, .. } => cause,
                    other => other.to_string(),
                };
                tracing::warn!(mutation = %handle.id(), cause = %cause, "Mutation rejected");
                Err(Error::Mutation {
                    ids: handle.record_ids().to_vec(),
                    cause,
                })
            }
        }
    }

    async fn wait_until_applied(&self, handle: &MutationHandle) -> Result<()> {
        loop {
            let notified = self.resolved.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.with_cache(|c| c.status(handle)) {
                Some(MutationStatus::Queued) => notified.await,
                Some(MutationStatus::InFlight) => return Ok(()),
                Some(MutationStatus::Failed) => {
                    return Err(Error::Mutation {
                        ids: handle.record_ids().to_vec(),
                        cause: "discarded by a cache reload before it was sent".into(),
                    })
                }
                _ => return Err(Error::UnknownMutation(handle.id())),
            }
        }
    }

    async fn send(&self, mutation: &Mutation, handle: &MutationHandle) -> Result<()> {
        let ids = handle.record_ids();
        match mutation {
            Mutation::ToggleFavorite { id } => {
                // The optimistic toggle already ran; send the value it produced.
                let value = self
                    .with_cache(|c| c.get(*id).map(|r| r.favorite))
                    .ok_or(Error::RecordNotFound(*id))?;
                self.store
                    .mutate_one(*id, &FieldChanges::favorite(value))
                    .await
            }
            Mutation::SetFavorite { value, .. } => {
                let changes = FieldChanges::favorite(*value);
                match ids {
                    [id] => self.store.mutate_one(*id, &changes).await,
                    _ => self.store.mutate_many(ids, &changes).await,
                }
            }
            Mutation::Delete { .. } => match ids {
                [id] => self.store.delete_one(*id).await,
                _ => self.store.delete_many(ids).await,
            },
        }
    }
}

impl<S: RemoteStore + ?Sized + 'static> Session<S> {
    /// Open the feed and pump it on a background task.
    pub async fn follow(self: &Arc<Self>) -> Result<FeedTask> {
        let feed = self.open_feed().await?;
        let cancel = feed.cancel_handle();
        let session = Arc::clone(self);
        let join = tokio::spawn(async move { session.pump(feed).await });
        Ok(FeedTask { cancel, join })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, StoreCall};
    use crate::Record;
    use std::time::Duration;

    fn session_with(records: &[Record]) -> (Arc<InMemoryStore>, Session<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::from_records(records));
        (store.clone(), Session::new(store))
    }

    #[tokio::test]
    async fn load_initializes_cache() {
        let (_, session) = session_with(&[Record::new(1), Record::new(2)]);
        let snapshot = session.load().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(session.with_cache(|c| c.is_initialized()));
    }

    #[tokio::test]
    async fn failed_load_leaves_cache_uninitialized() {
        let (store, session) = session_with(&[Record::new(1)]);
        store.fail_loads("timeout");

        let err = session.load().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(!session.with_cache(|c| c.is_initialized()));

        store.clear_failures();
        assert_eq!(session.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn toggle_sends_new_value() {
        let (store, session) = session_with(&[Record::new(1)]);
        session.load().await.unwrap();

        let snapshot = session.toggle_favorite(1).await.unwrap();
        assert!(snapshot.get(1).unwrap().favorite);
        assert_eq!(
            store.calls().last(),
            Some(&StoreCall::MutateOne(1, FieldChanges::favorite(true)))
        );
        assert_eq!(session.with_cache(|c| c.pending_count()), 0);
    }

    #[tokio::test]
    async fn rejected_mutation_rolls_back() {
        let (store, session) = session_with(&[Record::new(1), Record::new(2)]);
        session.load().await.unwrap();
        store.fail_mutations("permission denied");

        let err = session.set_favorite(&[1, 2], true).await.unwrap_err();
        assert_eq!(
            err,
            Error::Mutation {
                ids: vec![1, 2],
                cause: "permission denied".into()
            }
        );
        let snapshot = session.snapshot();
        assert!(snapshot.iter().all(|r| !r.favorite));
    }

    /// Yield until `session` tracks `count` pending mutations.
    async fn settle(session: &Session<InMemoryStore>, count: usize) {
        for _ in 0..100 {
            if session.with_cache(|c| c.pending_count()) == count {
                break;
            }
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.with_cache(|c| c.pending_count()), count);
    }

    #[tokio::test]
    async fn abandoned_mutation_rolls_back() {
        let (store, session) = session_with(&[Record::new(1)]);
        session.load().await.unwrap();
        store.hold_mutations();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), session.toggle_favorite(1)).await;
        assert!(abandoned.is_err());
        assert_eq!(session.with_cache(|c| c.pending_count()), 0);
        assert!(!session.snapshot().get(1).unwrap().favorite);

        // The id is free again for the next mutation.
        store.release_mutations();
        let snapshot = session.toggle_favorite(1).await.unwrap();
        assert!(snapshot.get(1).unwrap().favorite);
        assert_eq!(session.with_cache(|c| c.pending_count()), 0);
    }

    #[tokio::test]
    async fn abandoned_queued_mutation_does_not_block_later_ones() {
        let (store, session) = session_with(&[Record::new(1)]);
        let session = Arc::new(session);
        session.load().await.unwrap();
        store.hold_mutations();

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.toggle_favorite(1).await }
        });
        settle(&session, 1).await;

        let queued = tokio::time::timeout(
            Duration::from_millis(20),
            session.set_favorite(&[1], false),
        )
        .await;
        assert!(queued.is_err());
        assert_eq!(session.with_cache(|c| c.pending_count()), 1);

        store.release_mutations();
        let snapshot = first.await.unwrap().unwrap();
        assert!(snapshot.get(1).unwrap().favorite);
        assert_eq!(session.with_cache(|c| c.pending_count()), 0);
        assert_eq!(
            store.calls().last(),
            Some(&StoreCall::MutateOne(1, FieldChanges::favorite(true)))
        );
    }

    #[tokio::test]
    async fn reload_during_round_trip() {
        let (store, session) = session_with(&[Record::new(1)]);
        let session = Arc::new(session);
        session.load().await.unwrap();
        store.hold_mutations();

        let in_flight = tokio::spawn({
            let session = session.clone();
            async move { session.toggle_favorite(1).await }
        });
        settle(&session, 1).await;
        let queued = tokio::spawn({
            let session = session.clone();
            async move { session.delete(1).await }
        });
        settle(&session, 2).await;

        session.reload().await.unwrap();
        store.release_mutations();

        // The store applied the toggle, so the caller sees success.
        assert!(in_flight.await.unwrap().is_ok());
        assert_eq!(store.rows()[0]["favori"], serde_json::json!(true));

        // The queued delete never reached the store.
        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Mutation { ref ids, .. } if ids == &vec![1]));
        assert!(!store.calls().contains(&StoreCall::DeleteOne(1)));
        assert_eq!(session.with_cache(|c| c.pending_count()), 0);
    }

    #[tokio::test]
    async fn single_id_bulk_uses_single_call() {
        let (store, session) = session_with(&[Record::new(1), Record::new(2)]);
        session.load().await.unwrap();

        session.delete_many(&[2]).await.unwrap();
        assert_eq!(store.calls().last(), Some(&StoreCall::DeleteOne(2)));
        assert_eq!(session.snapshot().ids(), vec![1]);
    }

    #[tokio::test]
    async fn pump_applies_changes_until_cancelled() {
        let (store, session) = session_with(&[Record::new(1)]);
        let session = Arc::new(session);
        session.load().await.unwrap();

        let task = session.follow().await.unwrap();
        store.upsert(Record::new(2).to_row());
        store.remove(1);

        // Yield until the pump has drained both messages.
        for _ in 0..100 {
            if session.snapshot().ids() == vec![2] {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(session.snapshot().ids(), vec![2]);

        task.cancel();
        store.upsert(Record::new(3).to_row());
        task.join().await.unwrap();
        assert_eq!(session.snapshot().ids(), vec![2]);
    }

    #[tokio::test]
    async fn feed_follows_schema_table() {
        let store = Arc::new(InMemoryStore::default());
        let schema = RowSchema {
            table: "annonces".into(),
            ..RowSchema::entreprise()
        };
        let session = Session::new(store.clone()).with_schema(schema);

        session.open_feed().await.unwrap();
        assert_eq!(store.calls(), vec![StoreCall::Subscribe("annonces".into())]);
    }

    #[tokio::test]
    async fn pump_reports_lost_connection() {
        let (store, session) = session_with(&[]);
        session.load().await.unwrap();
        let feed = session.open_feed().await.unwrap();

        store.disconnect("network down");
        let err = session.pump(feed).await.unwrap_err();
        assert_eq!(err, Error::FeedLost("network down".into()));
    }
}
