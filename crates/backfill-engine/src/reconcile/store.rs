//! `Balances` access for the reconciliation job

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::db::DbResult;
use crate::window::BatchWindow;

/// One `Balances` row as the reconciler sees it
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BalanceRow {
    pub id: i64,
    pub account: String,
    pub chain_id: String,
    pub module: String,
    /// Non-fungible holdings carry a token id and are not queried
    pub has_token_id: bool,
    pub balance: BigDecimal,
}

/// Authoritative value for one row
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub id: i64,
    pub balance: BigDecimal,
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Highest key currently in the table, `None` when it is empty.
    async fn max_key(&self) -> DbResult<Option<i64>>;

    /// Up to `limit` rows with `id > after`, ascending. When `updated_since`
    /// is set only rows modified at or after it are returned.
    async fn fetch_page(
        &self,
        after: i64,
        limit: i64,
        updated_since: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<BalanceRow>>;

    /// Write every update of `window` in one transaction. Updates whose id
    /// falls outside the window are ignored. With `dry_run` the transaction
    /// is rolled back after the writes. Returns rows touched.
    async fn apply_window(
        &self,
        window: BatchWindow,
        updates: &[BalanceUpdate],
        dry_run: bool,
    ) -> DbResult<u64>;
}

#[derive(Clone)]
pub struct PgBalanceStore {
    pool: PgPool,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn max_key(&self) -> DbResult<Option<i64>> {
        let max = sqlx::query_scalar::<_, Option<i64>>(r#"SELECT MAX(id)::bigint FROM "Balances""#)
            .fetch_one(&self.pool)
            .await?;

        Ok(max)
    }

    async fn fetch_page(
        &self,
        after: i64,
        limit: i64,
        updated_since: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<BalanceRow>> {
        let rows = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT
                id::bigint AS id,
                account,
                "chainId"::text AS chain_id,
                module,
                ("tokenId" IS NOT NULL) AS has_token_id,
                balance
            FROM "Balances"
            WHERE id > $1
              AND ($3::timestamptz IS NULL OR "updatedAt" >= $3)
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .bind(updated_since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn apply_window(
        &self,
        window: BatchWindow,
        updates: &[BalanceUpdate],
        dry_run: bool,
    ) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut touched = 0;

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE "Balances"
                SET balance = $1, "updatedAt" = NOW()
                WHERE id = $2 AND id BETWEEN $3 AND $4
                "#,
            )
            .bind(&update.balance)
            .bind(update.id)
            .bind(window.low)
            .bind(window.high)
            .execute(&mut *tx)
            .await?;

            touched += result.rows_affected();
        }

        if dry_run {
            debug!(%window, touched, "Dry run, rolling back batch");
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }

        Ok(touched)
    }
}
