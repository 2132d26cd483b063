//! In-memory remote store.
//!
//! [`InMemoryStore`] keeps rows in a vector and fans change messages out to
//! its subscribers the way a database trigger would. Failures can be
//! injected per operation, which makes it the adapter of choice for
//! exercising [`Session`](crate::Session) without a network.

use crate::adapter::{Feed, FeedSender, FieldChanges, RemoteStore, Row};
use crate::{error::Result, Direction, Error, FeedMessage, Record, RecordId, RowSchema, SortKey};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// A call received by the store, recorded for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    LoadAll(SortKey, Direction),
    Subscribe(String),
    MutateOne(RecordId, FieldChanges),
    MutateMany(Vec<RecordId>, FieldChanges),
    DeleteOne(RecordId),
    DeleteMany(Vec<RecordId>),
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<Row>,
    subscribers: Vec<FeedSender>,
    load_failure: Option<String>,
    mutation_failure: Option<String>,
    echo: bool,
    calls: Vec<StoreCall>,
}

impl State {
    fn broadcast(&mut self, message: FeedMessage) {
        self.subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());
    }

    fn index_of(&self, id: RecordId) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get("id").and_then(Value::as_i64) == Some(id))
    }

    fn check_mutation(&self, ids: &[RecordId]) -> Result<()> {
        match &self.mutation_failure {
            Some(cause) => Err(Error::Mutation {
                ids: ids.to_vec(),
                cause: cause.clone(),
            }),
            None => Ok(()),
        }
    }

    fn update(&mut self, ids: &[RecordId], changes: &FieldChanges) -> Result<()> {
        self.check_mutation(ids)?;

        let mut touched = 0;
        for &id in ids {
            let Some(index) = self.index_of(id) else {
                continue;
            };
            if let (Some(value), Some(row)) = (changes.favorite, self.rows[index].as_object_mut()) {
                row.insert("favori".into(), Value::Bool(value));
            }
            touched += 1;
            if self.echo {
                let record = self.rows[index].clone();
                self.broadcast(FeedMessage::Update { record });
            }
        }
        no_rows(ids, touched)
    }

    fn delete(&mut self, ids: &[RecordId]) -> Result<()> {
        self.check_mutation(ids)?;

        let mut touched = 0;
        for &id in ids {
            let Some(index) = self.index_of(id) else {
                continue;
            };
            let old_record = self.rows.remove(index);
            touched += 1;
            if self.echo {
                self.broadcast(FeedMessage::Delete { old_record });
            }
        }
        no_rows(ids, touched)
    }
}

fn no_rows(ids: &[RecordId], touched: usize) -> Result<()> {
    if touched == 0 {
        return Err(Error::Mutation {
            ids: ids.to_vec(),
            cause: "no row matched".into(),
        });
    }
    Ok(())
}

/// A [`RemoteStore`] backed by process memory.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
    /// While `true`, mutation calls wait before touching the rows
    held: watch::Sender<bool>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InMemoryStore {
    /// Create a store holding `rows`. Successful mutations are echoed on the
    /// feed.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            state: Mutex::new(State {
                rows,
                echo: true,
                ..State::default()
            }),
            held: watch::Sender::new(false),
        }
    }

    pub fn from_records(records: &[Record]) -> Self {
        Self::new(records.iter().map(Record::to_row).collect())
    }

    /// Whether successful mutations produce feed messages.
    pub fn with_echo(self, echo: bool) -> Self {
        self.state().echo = echo;
        self
    }

    /// Make every `load_all` fail with a transport error.
    pub fn fail_loads(&self, cause: impl Into<String>) {
        self.state().load_failure = Some(cause.into());
    }

    /// Make every mutation fail.
    pub fn fail_mutations(&self, cause: impl Into<String>) {
        self.state().mutation_failure = Some(cause.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.load_failure = None;
        state.mutation_failure = None;
    }

    /// Make mutation calls wait until [`release_mutations`](Self::release_mutations).
    pub fn hold_mutations(&self) {
        self.held.send_replace(true);
    }

    pub fn release_mutations(&self) {
        self.held.send_replace(false);
    }

    async fn released(&self) {
        let mut held = self.held.subscribe();
        // The sender lives as long as `self`, so this only returns once released.
        let _ = held.wait_for(|held| !*held).await;
    }

    /// Send a raw message to every subscriber without touching the rows.
    pub fn emit(&self, message: FeedMessage) {
        self.state().broadcast(message);
    }

    /// Insert or replace a row and notify subscribers.
    pub fn upsert(&self, row: Row) {
        let mut state = self.state();
        let existing = row
            .get("id")
            .and_then(Value::as_i64)
            .and_then(|id| state.index_of(id));
        let message = match existing {
            Some(index) => {
                state.rows[index] = row.clone();
                FeedMessage::Update { record: row }
            }
            None => {
                state.rows.push(row.clone());
                FeedMessage::Insert { record: row }
            }
        };
        state.broadcast(message);
    }

    /// Remove a row and notify subscribers.
    pub fn remove(&self, id: RecordId) {
        let mut state = self.state();
        if let Some(index) = state.index_of(id) {
            let old_record = state.rows.remove(index);
            state.broadcast(FeedMessage::Delete { old_record });
        }
    }

    /// Report connection loss to every subscriber and drop them.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let mut state = self.state();
        state.broadcast(FeedMessage::Lost(reason.into()));
        state.subscribers.clear();
    }

    pub fn rows(&self) -> Vec<Row> {
        self.state().rows.clone()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn load_all(&self, order_by: SortKey, direction: Direction) -> Result<Vec<Row>> {
        let mut state = self.state();
        state.calls.push(StoreCall::LoadAll(order_by, direction));
        if let Some(cause) = &state.load_failure {
            return Err(Error::Transport(cause.clone()));
        }

        let schema = RowSchema::entreprise();
        let mut keyed: Vec<(Option<Record>, Row)> = state
            .rows
            .iter()
            .map(|row| (Record::from_row_with(&schema, row).ok(), row.clone()))
            .collect();

        // Rows that would not parse go last; the caller drops them anyway.
        keyed.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) if direction.is_ascending() => order_by.compare(a, b),
            (Some(a), Some(b)) => order_by.compare(b, a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    async fn subscribe(&self, table: &str) -> Result<Feed> {
        let mut state = self.state();
        state.calls.push(StoreCall::Subscribe(table.to_string()));
        let (tx, feed) = Feed::channel();
        state.subscribers.push(tx);
        Ok(feed)
    }

    async fn mutate_one(&self, id: RecordId, changes: &FieldChanges) -> Result<()> {
        self.released().await;
        let mut state = self.state();
        state.calls.push(StoreCall::MutateOne(id, changes.clone()));
        state.update(&[id], changes)
    }

    async fn mutate_many(&self, ids: &[RecordId], changes: &FieldChanges) -> Result<()> {
        self.released().await;
        let mut state = self.state();
        state
            .calls
            .push(StoreCall::MutateMany(ids.to_vec(), changes.clone()));
        state.update(ids, changes)
    }

    async fn delete_one(&self, id: RecordId) -> Result<()> {
        self.released().await;
        let mut state = self.state();
        state.calls.push(StoreCall::DeleteOne(id));
        state.delete(&[id])
    }

    async fn delete_many(&self, ids: &[RecordId]) -> Result<()> {
        self.released().await;
        let mut state = self.state();
        state.calls.push(StoreCall::DeleteMany(ids.to_vec()));
        state.delete(ids)
    }
}
