//! Change feed supervision.
//!
//! Keeps the session's change feed running. When the feed is lost, the
//! session resubscribes and reloads, since changes published while
//! disconnected are never replayed.

use liquidata_engine::{error::Result, FeedTask};
use std::time::Duration;

use crate::SharedSession;

/// Delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Subscribe to the change feed, then load the collection.
///
/// Subscribing first means changes published during the load are buffered
/// and replayed instead of lost.
pub async fn start(session: &SharedSession) -> Result<FeedTask> {
    let task = session.follow().await?;
    if let Err(e) = session.load().await {
        task.cancel();
        return Err(e);
    }
    Ok(task)
}

async fn resync(session: &SharedSession) -> Result<FeedTask> {
    let task = session.follow().await?;
    if let Err(e) = session.reload().await {
        task.cancel();
        return Err(e);
    }
    Ok(task)
}

/// Watch `task` and restart the feed whenever it is lost.
///
/// Returns once the feed is cancelled.
pub async fn supervise(session: SharedSession, mut task: FeedTask) {
    loop {
        match task.join().await {
            Ok(()) => {
                tracing::info!("Change feed stopped");
                return;
            }
            Err(e) => tracing::error!(error = %e, "Change feed lost, reconnecting"),
        }

        task = loop {
            tokio::time::sleep(RECONNECT_DELAY).await;
            match resync(&session).await {
                Ok(task) => {
                    tracing::info!(
                        version = session.snapshot().version(),
                        "Change feed restored"
                    );
                    break task;
                }
                Err(e) => tracing::warn!(error = %e, "Reconnect failed"),
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidata_engine::{InMemoryStore, Record, RemoteStore, Session};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn lost_feed_is_restored_with_fresh_data() {
        let store = Arc::new(InMemoryStore::from_records(&[Record::new(1)]));
        let dyn_store: Arc<dyn RemoteStore> = store.clone();
        let session: SharedSession = Arc::new(Session::new(dyn_store));

        let task = start(&session).await.unwrap();
        let supervisor = tokio::spawn(supervise(session.clone(), task));

        // Lose the connection, then change a row while nobody listens.
        store.disconnect("restart");
        tokio::task::yield_now().await;
        store.upsert(Record::new(2).to_row());

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if session.snapshot().len() == 2 {
                break;
            }
        }
        assert_eq!(session.snapshot().len(), 2);
        assert_eq!(store.subscriber_count(), 1);

        supervisor.abort();
    }
}
