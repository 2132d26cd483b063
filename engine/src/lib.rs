//! # Liquidata Engine
//!
//! A client-side record cache and query engine for company liquidation
//! notices.
//!
//! The engine keeps a locally materialized, continuously reconciled copy of
//! a remote record collection. It merges remote change events with local
//! optimistic mutations and answers filter, sort, pagination, map and
//! statistics queries over immutable snapshots.
//!
//! ## Design Principles
//!
//! - **Snapshots, not locks**: readers get an immutable [`Snapshot`] and
//!   never observe a half-applied change
//! - **Remote wins**: a change reported by the store supersedes local state
//! - **Pure queries**: filtering, sorting and aggregation are free functions
//!   over records
//! - **Transport-agnostic**: the network sits behind [`RemoteStore`]
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is the typed form of one remote row, validated against a
//! [`RowSchema`]. Malformed rows never reach the cache.
//!
//! ### Reconciling Cache
//!
//! The [`ReconcilingCache`] folds [`ChangeEvent`]s and optimistic
//! [`Mutation`]s into one ordered collection and publishes a new versioned
//! snapshot to its subscribers after every change.
//!
//! ### Session
//!
//! A [`Session`] binds a cache to a [`RemoteStore`]: it loads the
//! collection, pumps the change feed and runs each mutation through its
//! remote round trip, rolling back on failure.
//!
//! ## Quick Start
//!
//! ```rust
//! use liquidata_engine::{filter, sort, Direction, Filter, Record, ReconcilingCache, SortKey};
//!
//! let mut cache = ReconcilingCache::new();
//! cache
//!     .initialize(vec![
//!         Record::new(1).with_name("Boulangerie Martin").with_score(8),
//!         Record::new(2).with_name("Garage Durand").with_score(3),
//!     ])
//!     .unwrap();
//!
//! let snapshot = cache.snapshot();
//! let hits = filter(&snapshot, &Filter::new().score_min(5));
//! let ordered = sort(hits, SortKey::Name, Direction::Asc);
//! assert_eq!(ordered[0].id, 1);
//! ```

pub mod adapter;
pub mod cache;
pub mod error;
pub mod event;
pub mod memory;
pub mod query;
pub mod record;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod stats;

// Re-export main types at crate root
pub use adapter::{CancelHandle, Feed, FeedSender, FieldChanges, RemoteStore, Row};
pub use cache::{
    Mutation, MutationHandle, MutationId, MutationStatus, ReconcilingCache, Subscription,
};
pub use error::Error;
pub use event::{ChangeEvent, FeedMessage};
pub use memory::{InMemoryStore, StoreCall};
pub use query::{
    distinct_activity_codes, distinct_departments, filter, geo_filter, markers, paginate, sort,
    Direction, Filter, MapMarker, Page, SortKey, ALL_DEPARTMENTS,
};
pub use record::{ingest_rows, Annotations, Notice, Record, ScoreTier, SCORE_MAX, SCORE_MIN};
pub use schema::{FieldDef, FieldKind, RowSchema, DEFAULT_TABLE};
pub use session::{FeedTask, Session};
pub use snapshot::Snapshot;
pub use stats::{aggregate, CountEntry, MonthCount, Statistics, OTHER_LABEL, TOP_N};

/// Type aliases for clarity
pub type RecordId = i64;
pub type Version = u64;
