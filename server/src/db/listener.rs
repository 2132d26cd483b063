//! Change feed over PostgreSQL `LISTEN`/`NOTIFY`.
//!
//! The migration installs a trigger that publishes every row change on the
//! feed channel as JSON. A dedicated connection listens on that channel and
//! forwards decoded messages into a [`Feed`].

use liquidata_engine::{error::Result, Error, Feed, FeedMessage, FeedSender};
use sqlx::postgres::PgListener;
use sqlx::PgPool;

/// Start listening on `channel` and return the feed of decoded changes.
///
/// Connection loss is reported once as [`FeedMessage::Lost`], after which
/// the feed ends. Notifications published while disconnected are not
/// replayed, so callers reload after a loss.
pub async fn listen(pool: &PgPool, table: &str, channel: &str) -> Result<Feed> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    listener
        .listen(channel)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    tracing::info!(table = %table, channel = %channel, "Listening for changes");

    let (tx, feed) = Feed::channel();
    let task = tokio::spawn(forward(listener, tx, table.to_string()));
    let abort = task.abort_handle();
    feed.cancel_handle().on_cancel(move || abort.abort());

    Ok(feed)
}

async fn forward(mut listener: PgListener, tx: FeedSender, table: String) {
    loop {
        let lost = match listener.try_recv().await {
            Ok(Some(notification)) => {
                if let Some(message) = decode(notification.payload(), &table) {
                    if tx.send(message).is_err() {
                        tracing::debug!(table = %table, "Feed receiver dropped");
                        return;
                    }
                }
                continue;
            }
            Ok(None) => "connection to the database was closed".to_string(),
            Err(e) => e.to_string(),
        };

        tracing::error!(table = %table, reason = %lost, "Change listener stopped");
        let _ = tx.send(FeedMessage::Lost(lost));
        return;
    }
}

/// Decode a trigger payload, skipping other tables and unreadable payloads.
fn decode(payload: &str, table: &str) -> Option<FeedMessage> {
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable notification");
            return None;
        }
    };

    if let Some(source) = value.get("table").and_then(|t| t.as_str()) {
        if source != table {
            return None;
        }
    }

    match serde_json::from_value(value) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring notification with unknown shape");
            None
        }
    }
}
