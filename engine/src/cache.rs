//! Reconciling cache - the authoritative in-memory record collection.
//!
//! The cache folds two independent sources of change into one ordered
//! collection: remote [`ChangeEvent`]s and local optimistic [`Mutation`]s.
//! Every change bumps a logical version and publishes a fresh [`Snapshot`]
//! to all live subscribers.
//!
//! The cache is synchronous. Nothing here suspends; remote round trips are
//! orchestrated by [`Session`](crate::Session), which calls
//! [`ReconcilingCache::confirm`] or [`ReconcilingCache::rollback`] once the
//! remote store has answered.
//!
//! ## Optimistic mutations
//!
//! A mutation is applied immediately and tracked with the prior values it
//! overwrote. Mutations whose id sets overlap an unresolved mutation are
//! queued and applied in submission order once the earlier one resolves, so
//! two writes to the same record never race.

use crate::{error::Result, ChangeEvent, Error, Record, RecordId, Snapshot, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Number of resolved mutation statuses kept for [`ReconcilingCache::status`].
const RESOLVED_HISTORY: usize = 256;

/// Identifier of an optimistic mutation, unique per cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(u64);

impl std::fmt::Display for MutationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A local change applied before remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Mutation {
    /// Flip the favorite flag of one record
    ToggleFavorite { id: RecordId },
    /// Set the favorite flag of a set of records
    SetFavorite { ids: Vec<RecordId>, value: bool },
    /// Remove a set of records
    Delete { ids: Vec<RecordId> },
}

impl Mutation {
    pub fn toggle_favorite(id: RecordId) -> Self {
        Mutation::ToggleFavorite { id }
    }

    pub fn set_favorite(ids: impl Into<Vec<RecordId>>, value: bool) -> Self {
        Mutation::SetFavorite {
            ids: ids.into(),
            value,
        }
    }

    pub fn delete(ids: impl Into<Vec<RecordId>>) -> Self {
        Mutation::Delete { ids: ids.into() }
    }

    /// Ids touched by this mutation, deduplicated in first-seen order.
    pub fn ids(&self) -> Vec<RecordId> {
        let raw: &[RecordId] = match self {
            Mutation::ToggleFavorite { id } => std::slice::from_ref(id),
            Mutation::SetFavorite { ids, .. } | Mutation::Delete { ids } => ids,
        };
        let mut seen = HashSet::new();
        raw.iter().copied().filter(|id| seen.insert(*id)).collect()
    }
}

/// Lifecycle of an optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationStatus {
    /// Waiting for an overlapping mutation to resolve; not yet visible
    Queued,
    /// Applied locally, awaiting the remote answer
    InFlight,
    Confirmed,
    /// Rolled back
    Failed,
}

/// Handle returned by [`ReconcilingCache::begin_optimistic_mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationHandle {
    id: MutationId,
    ids: Vec<RecordId>,
}

impl MutationHandle {
    pub fn id(&self) -> MutationId {
        self.id
    }

    /// Records covered by the mutation.
    pub fn record_ids(&self) -> &[RecordId] {
        &self.ids
    }
}

/// Value overwritten by an applied mutation.
#[derive(Debug, Clone)]
enum Prior {
    Favorite { id: RecordId, value: bool },
    Removed { index: usize, record: Record },
}

impl Prior {
    fn record_id(&self) -> RecordId {
        match self {
            Prior::Favorite { id, .. } => *id,
            Prior::Removed { record, .. } => record.id,
        }
    }
}

#[derive(Debug)]
struct PendingMutation {
    mutation: Mutation,
    ids: Vec<RecordId>,
    status: MutationStatus,
    priors: Vec<Prior>,
}

type Callback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    live: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<ListenerEntry>,
}

fn lock(listeners: &Mutex<Listeners>) -> std::sync::MutexGuard<'_, Listeners> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of a snapshot listener.
///
/// Dropping the subscription does not unsubscribe; call
/// [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    live: Arc<AtomicBool>,
    registry: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Stop delivery. Idempotent; no callback runs after this returns,
    /// including for a publish already in progress on another listener.
    pub fn unsubscribe(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            if let Some(registry) = self.registry.upgrade() {
                lock(&registry).entries.retain(|e| e.id != self.id);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// The authoritative in-memory record collection.
#[derive(Debug)]
pub struct ReconcilingCache {
    records: Vec<Record>,
    initialized: bool,
    version: Version,
    current: Snapshot,
    /// Events received before the bulk load completed
    buffered: Vec<ChangeEvent>,
    next_mutation: u64,
    pending: BTreeMap<MutationId, PendingMutation>,
    resolved: VecDeque<(MutationId, MutationStatus)>,
    listeners: Arc<Mutex<Listeners>>,
}

impl Default for ReconcilingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcilingCache {
    /// Create an empty, uninitialized cache.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            initialized: false,
            version: 0,
            current: Snapshot::empty(),
            buffered: Vec::new(),
            next_mutation: 0,
            pending: BTreeMap::new(),
            resolved: VecDeque::new(),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.current.clone()
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Events waiting for the bulk load.
    pub fn buffered_count(&self) -> usize {
        self.buffered.len()
    }

    /// Mutations not yet confirmed or rolled back.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    /// Replace the collection with the result of a bulk load.
    ///
    /// Fails with [`Error::AlreadyInitialized`] unless the cache is fresh or
    /// was [`reset`](Self::reset). Duplicate ids keep their first occurrence.
    /// Events buffered before the load are folded in afterwards, in order.
    pub fn initialize(&mut self, records: Vec<Record>) -> Result<Snapshot> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }

        let mut seen = HashSet::with_capacity(records.len());
        self.records = records
            .into_iter()
            .filter(|r| {
                let fresh = seen.insert(r.id);
                if !fresh {
                    tracing::warn!(record_id = r.id, "Dropping duplicate record from bulk load");
                }
                fresh
            })
            .collect();
        self.initialized = true;

        let buffered = std::mem::take(&mut self.buffered);
        if !buffered.is_empty() {
            tracing::debug!(count = buffered.len(), "Replaying buffered change events");
        }
        for event in buffered {
            self.fold(event);
        }

        tracing::info!(records = self.records.len(), "Record cache initialized");
        Ok(self.publish())
    }

    /// Discard all state so [`initialize`](Self::initialize) may run again.
    ///
    /// Pending mutations are discarded without rollback and report
    /// [`MutationStatus::Failed`]. Subscribers stay registered and receive
    /// the empty snapshot.
    pub fn reset(&mut self) -> Snapshot {
        self.records.clear();
        self.buffered.clear();
        let discarded = std::mem::take(&mut self.pending);
        if !discarded.is_empty() {
            tracing::warn!(count = discarded.len(), "Discarding pending mutations on reset");
        }
        for id in discarded.into_keys() {
            self.remember(id, MutationStatus::Failed);
        }
        self.initialized = false;
        self.publish()
    }

    /// Fold a remote change into the collection.
    ///
    /// Before initialization the event is buffered and the current snapshot
    /// is returned unchanged.
    pub fn apply(&mut self, event: ChangeEvent) -> Snapshot {
        if !self.initialized {
            self.buffered.push(event);
            return self.snapshot();
        }

        self.fold(event);
        self.publish()
    }

    fn fold(&mut self, event: ChangeEvent) {
        let id = event.record_id();
        match event {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => {
                match self.position(record.id) {
                    Some(index) => self.records[index] = record,
                    None => self.records.insert(0, record),
                }
            }
            ChangeEvent::Deleted(id) => {
                if let Some(index) = self.position(id) {
                    self.records.remove(index);
                }
            }
        }

        // The remote store is the source of truth: a change it reports for a
        // record supersedes any value an in-flight mutation would restore.
        for pending in self.pending.values_mut() {
            pending.priors.retain(|p| p.record_id() != id);
        }
    }

    /// Apply a mutation locally and start tracking it.
    ///
    /// If any id overlaps an unresolved mutation the new one is queued and
    /// becomes visible only after the earlier one resolves. Fails with
    /// [`Error::RecordNotFound`] when none of the ids is in the collection.
    pub fn begin_optimistic_mutation(&mut self, mutation: Mutation) -> Result<MutationHandle> {
        let ids = mutation.ids();
        let Some(&first) = ids.first() else {
            return Err(Error::Mutation {
                ids,
                cause: "empty id set".into(),
            });
        };
        if !ids.iter().any(|id| self.position(*id).is_some()) {
            return Err(Error::RecordNotFound(first));
        }

        let id = MutationId(self.next_mutation);
        self.next_mutation += 1;

        let busy: HashSet<RecordId> = self
            .pending
            .values()
            .flat_map(|p| p.ids.iter().copied())
            .collect();
        let blocked = ids.iter().any(|i| busy.contains(i));

        let mut pending = PendingMutation {
            mutation,
            ids: ids.clone(),
            status: MutationStatus::Queued,
            priors: Vec::new(),
        };

        if blocked {
            tracing::debug!(mutation = %id, ids = ?ids, "Queueing overlapping mutation");
            self.pending.insert(id, pending);
        } else {
            pending.priors = self.apply_mutation(&pending.mutation);
            pending.status = MutationStatus::InFlight;
            self.pending.insert(id, pending);
            self.publish();
        }

        Ok(MutationHandle { id, ids })
    }

    /// Mark an applied mutation permanent.
    pub fn confirm(&mut self, handle: &MutationHandle) -> Result<()> {
        match self.pending.get(&handle.id).map(|p| p.status) {
            None => return Err(Error::UnknownMutation(handle.id)),
            Some(MutationStatus::Queued) => return Err(Error::MutationQueued(handle.id)),
            Some(_) => {}
        }

        self.pending.remove(&handle.id);
        self.remember(handle.id, MutationStatus::Confirmed);
        tracing::debug!(mutation = %handle.id, "Mutation confirmed");

        self.promote_queued();
        Ok(())
    }

    /// Revert an applied mutation to the values it overwrote.
    ///
    /// Rolling back a queued mutation cancels it without any visible change.
    pub fn rollback(&mut self, handle: &MutationHandle) -> Result<Snapshot> {
        let pending = self
            .pending
            .remove(&handle.id)
            .ok_or(Error::UnknownMutation(handle.id))?;
        self.remember(handle.id, MutationStatus::Failed);

        let snapshot = if pending.status == MutationStatus::Queued {
            tracing::debug!(mutation = %handle.id, "Queued mutation cancelled");
            self.snapshot()
        } else {
            tracing::warn!(mutation = %handle.id, ids = ?pending.ids, "Rolling back mutation");
            self.restore(pending.priors);
            self.publish()
        };

        self.promote_queued();
        Ok(snapshot)
    }

    /// Status of a mutation, if it is pending or recently resolved.
    pub fn status(&self, handle: &MutationHandle) -> Option<MutationStatus> {
        self.pending.get(&handle.id).map(|p| p.status).or_else(|| {
            self.resolved
                .iter()
                .rev()
                .find(|(id, _)| *id == handle.id)
                .map(|(_, status)| *status)
        })
    }

    /// Register a snapshot listener.
    ///
    /// The listener is called with the current snapshot immediately, then
    /// with every snapshot published afterwards. Listeners run while the
    /// caller holds the cache, so they must not call back into it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let live = Arc::new(AtomicBool::new(true));
        let callback: Callback = Arc::new(listener);

        let id = {
            let mut registry = lock(&self.listeners);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push(ListenerEntry {
                id,
                live: live.clone(),
                callback: callback.clone(),
            });
            id
        };

        callback(&self.current);

        Subscription {
            id,
            live,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    fn position(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    fn apply_mutation(&mut self, mutation: &Mutation) -> Vec<Prior> {
        match mutation {
            Mutation::ToggleFavorite { id } => match self.position(*id) {
                Some(index) => {
                    let record = &mut self.records[index];
                    let prior = Prior::Favorite {
                        id: *id,
                        value: record.favorite,
                    };
                    record.favorite = !record.favorite;
                    vec![prior]
                }
                None => Vec::new(),
            },
            Mutation::SetFavorite { ids, value } => {
                let mut priors = Vec::with_capacity(ids.len());
                for id in mutation_ids(ids) {
                    if let Some(index) = self.position(id) {
                        let record = &mut self.records[index];
                        priors.push(Prior::Favorite {
                            id,
                            value: record.favorite,
                        });
                        record.favorite = *value;
                    }
                }
                priors
            }
            Mutation::Delete { ids } => {
                let targets: HashSet<RecordId> = ids.iter().copied().collect();
                let indexes: Vec<usize> = self
                    .records
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| targets.contains(&r.id))
                    .map(|(i, _)| i)
                    .collect();

                let mut priors: Vec<Prior> = indexes
                    .iter()
                    .rev()
                    .map(|&index| Prior::Removed {
                        index,
                        record: self.records.remove(index),
                    })
                    .collect();
                priors.reverse();
                priors
            }
        }
    }

    fn restore(&mut self, priors: Vec<Prior>) {
        // Removed priors are in ascending original index; reinserting in that
        // order rebuilds the original layout.
        for prior in priors {
            match prior {
                Prior::Favorite { id, value } => {
                    if let Some(index) = self.position(id) {
                        self.records[index].favorite = value;
                    }
                }
                Prior::Removed { index, record } => {
                    if self.position(record.id).is_none() {
                        let index = index.min(self.records.len());
                        self.records.insert(index, record);
                    }
                }
            }
        }
    }

    fn promote_queued(&mut self) {
        let mut busy: HashSet<RecordId> = HashSet::new();
        let mut promote = Vec::new();

        for (id, pending) in &self.pending {
            let overlaps = pending.ids.iter().any(|i| busy.contains(i));
            if pending.status == MutationStatus::Queued && !overlaps {
                promote.push(*id);
            }
            busy.extend(pending.ids.iter().copied());
        }

        if promote.is_empty() {
            return;
        }

        for id in promote {
            let Some(mutation) = self.pending.get(&id).map(|p| p.mutation.clone()) else {
                continue;
            };
            let priors = self.apply_mutation(&mutation);
            if let Some(pending) = self.pending.get_mut(&id) {
                pending.priors = priors;
                pending.status = MutationStatus::InFlight;
            }
            tracing::debug!(mutation = %id, "Queued mutation applied");
            self.publish();
        }
    }

    fn remember(&mut self, id: MutationId, status: MutationStatus) {
        self.resolved.push_back((id, status));
        while self.resolved.len() > RESOLVED_HISTORY {
            self.resolved.pop_front();
        }
    }

    fn publish(&mut self) -> Snapshot {
        self.version += 1;
        self.current = Snapshot::new(self.version, self.records.clone());

        let entries: Vec<(Arc<AtomicBool>, Callback)> = lock(&self.listeners)
            .entries
            .iter()
            .map(|e| (e.live.clone(), e.callback.clone()))
            .collect();

        for (live, callback) in entries {
            if live.load(Ordering::SeqCst) {
                callback(&self.current);
            }
        }

        tracing::trace!(version = self.version, records = self.records.len(), "Snapshot published");
        self.current.clone()
    }
}

fn mutation_ids(ids: &[RecordId]) -> Vec<RecordId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
