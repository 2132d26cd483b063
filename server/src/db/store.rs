//! PostgreSQL implementation of the remote store.

use async_trait::async_trait;
use liquidata_engine::{
    error::Result, Direction, Error, Feed, FieldChanges, RecordId, RemoteStore, Row, SortKey,
};
use sqlx::PgPool;

use super::listen;

/// Remote store backed by one PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    table: String,
    channel: String,
}

impl PgStore {
    /// `table` and `channel` must already be validated identifiers.
    pub fn new(pool: PgPool, table: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            channel: channel.into(),
        }
    }

    async fn set_favorite(&self, ids: &[RecordId], changes: &FieldChanges) -> Result<()> {
        let Some(value) = changes.favorite else {
            return Err(Error::Mutation {
                ids: ids.to_vec(),
                cause: "no column to update".into(),
            });
        };

        let sql = format!("UPDATE {} SET favori = $1 WHERE id = ANY($2)", self.table);
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| rejected(ids, e))?;

        tracing::debug!(ids = ?ids, favori = value, rows = result.rows_affected(), "Updated favorites");
        require_rows(ids, result.rows_affected())
    }

    async fn remove(&self, ids: &[RecordId]) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ANY($1)", self.table);
        let result = sqlx::query(&sql)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| rejected(ids, e))?;

        tracing::debug!(ids = ?ids, rows = result.rows_affected(), "Deleted records");
        require_rows(ids, result.rows_affected())
    }
}

fn rejected(ids: &[RecordId], e: sqlx::Error) -> Error {
    Error::Mutation {
        ids: ids.to_vec(),
        cause: e.to_string(),
    }
}

fn require_rows(ids: &[RecordId], affected: u64) -> Result<()> {
    if affected == 0 {
        return Err(Error::Mutation {
            ids: ids.to_vec(),
            cause: "no row matched".into(),
        });
    }
    Ok(())
}

/// `ORDER BY` clause matching the in-memory ordering, where absent values
/// sort lowest.
fn order_clause(order_by: SortKey, direction: Direction) -> String {
    let column = order_by.column();
    if direction.is_ascending() {
        format!("{} ASC NULLS FIRST, id ASC", column)
    } else {
        format!("{} DESC NULLS LAST, id ASC", column)
    }
}

#[async_trait]
impl RemoteStore for PgStore {
    async fn load_all(&self, order_by: SortKey, direction: Direction) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT row_to_json(t) FROM {} t ORDER BY {}",
            self.table,
            order_clause(order_by, direction)
        );

        let rows: Vec<Row> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        tracing::info!(table = %self.table, rows = rows.len(), "Loaded records");
        Ok(rows)
    }

    async fn subscribe(&self, table: &str) -> Result<Feed> {
        listen(&self.pool, table, &self.channel).await
    }

    async fn mutate_one(&self, id: RecordId, changes: &FieldChanges) -> Result<()> {
        self.set_favorite(&[id], changes).await
    }

    async fn mutate_many(&self, ids: &[RecordId], changes: &FieldChanges) -> Result<()> {
        self.set_favorite(ids, changes).await
    }

    async fn delete_one(&self, id: RecordId) -> Result<()> {
        self.remove(&[id]).await
    }

    async fn delete_many(&self, ids: &[RecordId]) -> Result<()> {
        self.remove(ids).await
    }
}
