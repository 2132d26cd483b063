//! Liquidata Server - view gateway over a live record cache.
//!
//! The server keeps one [`Session`] bound to the PostgreSQL record table,
//! follows its change feed, and serves the listing, map and dashboard views
//! from cache snapshots. Mutations go through the session's optimistic
//! round trip; WebSocket clients are told about every new snapshot.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod routes;
pub mod websocket;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::websocket::{ConnectionManager, ServerMessage};
use axum::Router;
use liquidata_engine::{RemoteStore, Session, Snapshot, Subscription};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The session type shared by all handlers.
pub type SharedSession = Arc<Session<dyn RemoteStore>>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SharedSession,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(session: SharedSession, config: Config) -> Self {
        Self {
            session,
            config: Arc::new(config),
            conn_manager: ConnectionManager::new_shared(),
        }
    }

    /// The current snapshot, once the initial load has completed.
    pub fn ready_snapshot(&self) -> Result<Snapshot> {
        self.session
            .with_cache(|c| c.is_initialized().then(|| c.snapshot()))
            .ok_or(AppError::NotReady)
    }

    /// Push a summary of every published snapshot to WebSocket clients.
    pub fn broadcast_snapshots(&self) -> Subscription {
        let manager = self.conn_manager.clone();
        self.session.subscribe(move |snapshot| {
            manager.broadcast_all(ServerMessage::snapshot(snapshot));
        })
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
