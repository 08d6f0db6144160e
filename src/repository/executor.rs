use std::time::Duration;

use futures_util::future::BoxFuture;
use sqlx::{pool::PoolConnection, Sqlite, SqliteConnection, SqlitePool};

use crate::error::{AppError, Result};

/// Runs a unit of work inside one SQLite write transaction.
///
/// The unit starts with `BEGIN IMMEDIATE`, so the database write lock is
/// taken before the first read: concurrent units against the same file are
/// fully serialized and every read observes the unit's own writes. The whole
/// unit (lock acquisition included) is bounded by `timeout`; on timeout or
/// error nothing is committed and the unit can be replayed.
///
/// Units must not perform external side effects. Calls to the payment
/// gateway happen before or after `run`, guarded by an idempotency key.
#[derive(Clone)]
pub struct TransactionalExecutor {
    pool: SqlitePool,
    timeout: Duration,
}

impl TransactionalExecutor {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run<T, F>(&self, unit: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut conn = self.pool.acquire().await?;
        let mut begun = false;

        let outcome = tokio::time::timeout(self.timeout, async {
            sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
            begun = true;
            unit(&mut *conn).await
        })
        .await;

        match outcome {
            Ok(Ok(value)) => match sqlx::query("COMMIT").execute(&mut *conn).await {
                Ok(_) => Ok(value),
                Err(e) => {
                    Self::rollback(conn).await;
                    Err(e.into())
                }
            },
            Ok(Err(e)) => {
                if begun {
                    Self::rollback(conn).await;
                }
                Err(e)
            }
            Err(_) => {
                tracing::warn!("Store unit exceeded {:?}, rolling back", self.timeout);
                Self::rollback(conn).await;
                Err(AppError::Timeout(self.timeout))
            }
        }
    }

    async fn rollback(mut conn: PoolConnection<Sqlite>) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            // The connection may still hold a half-finished transaction;
            // keep it out of the pool.
            tracing::warn!("Rollback failed, discarding connection: {}", e);
            drop(conn.detach());
        }
    }
}
