//! Target-table access for the `code` → `codetext` conversion

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::DbResult;
use crate::window::BatchWindow;

/// `id` and the raw text of `code` for one `TransactionDetails` row
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RawCodeRow {
    pub id: i64,
    pub code: Option<String>,
}

/// Store that owns the table being converted
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Highest id whose `code` still needs converting, `None` when no row
    /// does. This is where a (re)started job begins.
    async fn resume_boundary(&self) -> DbResult<Option<i64>>;

    /// Open the transaction that will validate and convert one window.
    async fn begin_window(&self) -> DbResult<Box<dyn WindowSession>>;
}

/// One open transaction, scoped to a single window
#[async_trait]
pub trait WindowSession: Send {
    /// Read every row in the window, highest id first.
    async fn fetch_window(&mut self, window: BatchWindow) -> DbResult<Vec<RawCodeRow>>;

    /// Set-based conversion of the whole window. Returns rows touched.
    async fn convert_window(&mut self, window: BatchWindow) -> DbResult<u64>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// PostgreSQL-backed `TransactionDetails` store
#[derive(Clone)]
pub struct PgMigrationStore {
    pool: PgPool,
}

impl PgMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationStore for PgMigrationStore {
    async fn resume_boundary(&self) -> DbResult<Option<i64>> {
        let boundary = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MAX(id)::bigint
            FROM "TransactionDetails"
            WHERE code IS NOT NULL
              AND code <> '{}'::jsonb
              AND codetext IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(boundary)
    }

    async fn begin_window(&self) -> DbResult<Box<dyn WindowSession>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgWindowSession { tx }))
    }
}

struct PgWindowSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl WindowSession for PgWindowSession {
    async fn fetch_window(&mut self, window: BatchWindow) -> DbResult<Vec<RawCodeRow>> {
        let rows = sqlx::query_as::<_, RawCodeRow>(
            r#"
            SELECT id::bigint AS id, code::text AS code
            FROM "TransactionDetails"
            WHERE id >= $1 AND id <= $2
            ORDER BY id DESC
            "#,
        )
        .bind(window.low)
        .bind(window.high)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn convert_window(&mut self, window: BatchWindow) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE "TransactionDetails"
            SET codetext = CASE
                WHEN code IS NULL OR code = '{}'::jsonb THEN NULL
                ELSE code #>> '{}'
            END
            WHERE id >= $1 AND id <= $2
            "#,
        )
        .bind(window.low)
        .bind(window.high)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
