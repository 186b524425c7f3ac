//! Balance reconciliation against the node
//!
//! Walks `Balances` in ascending keyset pages. For every fungible row of a
//! page the node is asked for the current balance, with at most
//! `concurrency` queries in flight; the answers are then written back in a
//! single transaction for the page. A row whose query fails is skipped and
//! counted, it never stops the job. A failed write does.

pub mod store;

use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::DbError;
use crate::executor::BoundedExecutor;
use crate::oracle::{Oracle, OracleQuery};
use crate::progress::{ProgressState, ProgressTracker, ScanDirection};
use crate::window::{AscendingCursor, BatchWindow, WindowError};

pub use store::{BalanceRow, BalanceStore, BalanceUpdate, PgBalanceStore};

pub const DEFAULT_RECONCILE_BATCH_SIZE: i64 = 1000;
pub const DEFAULT_ORACLE_CONCURRENCY: usize = 50;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Invalid window configuration: {0}")]
    Window(#[from] WindowError),

    #[error("Failed to read table bounds: {0}")]
    Boundary(#[source] DbError),

    #[error("Failed to fetch rows after id {after}: {source}")]
    Fetch {
        after: i64,
        #[source]
        source: DbError,
    },

    #[error("Failed to commit batch {window}: {source}")]
    Commit {
        window: BatchWindow,
        #[source]
        source: DbError,
    },
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub batch_size: i64,
    pub concurrency: usize,
    /// Start strictly above this key
    pub after: i64,
    /// Only rows updated within this long ago are eligible
    pub lookback: Option<Duration>,
    pub dry_run: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_RECONCILE_BATCH_SIZE,
            concurrency: DEFAULT_ORACLE_CONCURRENCY,
            after: 0,
            lookback: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSummary {
    pub windows: u64,
    /// Rows read from the table
    pub processed: u64,
    /// Rows written back
    pub updated: u64,
    /// Written rows whose stored balance differed from the node's
    pub changed: u64,
    /// Rows the node is never asked about (token-id holdings, unusable
    /// module names)
    pub out_of_scope: u64,
    /// Rows whose query failed this run
    pub fetch_failed: u64,
    pub dry_run: bool,
    /// Final tracker state, `None` when there was nothing to scan
    pub progress: Option<ProgressState>,
}

impl ReconcileSummary {
    pub fn skipped(&self) -> u64 {
        self.out_of_scope + self.fetch_failed
    }

    fn absorb(&mut self, outcome: &WindowOutcome) {
        self.windows += 1;
        self.processed += outcome.processed;
        self.updated += outcome.updated;
        self.changed += outcome.changed;
        self.out_of_scope += outcome.out_of_scope;
        self.fetch_failed += outcome.fetch_failed;
    }
}

#[derive(Debug, Default)]
struct WindowOutcome {
    processed: u64,
    updated: u64,
    changed: u64,
    out_of_scope: u64,
    fetch_failed: u64,
}

pub struct BalanceReconciler {
    store: Arc<dyn BalanceStore>,
    oracle: Arc<dyn Oracle>,
    executor: BoundedExecutor,
    config: ReconcileConfig,
}

impl BalanceReconciler {
    pub fn new(store: Arc<dyn BalanceStore>, oracle: Arc<dyn Oracle>, config: ReconcileConfig) -> Self {
        Self {
            store,
            oracle,
            executor: BoundedExecutor::new(config.concurrency),
            config,
        }
    }

    pub async fn run(&self) -> Result<ReconcileSummary, ReconcileError> {
        let mut cursor = AscendingCursor::new(self.config.after, self.config.batch_size)?;
        let mut summary = ReconcileSummary {
            dry_run: self.config.dry_run,
            ..ReconcileSummary::default()
        };

        let max_key = self.store.max_key().await.map_err(ReconcileError::Boundary)?;
        let end = match max_key {
            Some(end) if end > self.config.after => end,
            _ => {
                info!(after = self.config.after, "No balances to reconcile");
                return Ok(summary);
            },
        };

        let updated_since = self.config.lookback.map(|lookback| Utc::now() - lookback);
        info!(
            after = self.config.after,
            max_id = end,
            batch_size = self.config.batch_size,
            concurrency = self.executor.concurrency(),
            updated_since = ?updated_since,
            "Starting balance reconciliation"
        );

        let mut tracker =
            ProgressTracker::new("reconcile", ScanDirection::Ascending, self.config.after + 1, end);

        loop {
            let after = cursor.position();
            let page = self
                .store
                .fetch_page(after, cursor.batch_size(), updated_since)
                .await
                .map_err(|source| ReconcileError::Fetch { after, source })?;

            let Some(window) = cursor.advance(page.last().map(|row| row.id)) else {
                break;
            };

            let outcome = self.reconcile_window(window, page).await?;
            summary.absorb(&outcome);
            tracker.record(window, outcome.processed);
        }

        tracker.finish();
        summary.progress = Some(tracker.state());
        info!(
            windows = summary.windows,
            processed = summary.processed,
            updated = summary.updated,
            changed = summary.changed,
            out_of_scope = summary.out_of_scope,
            fetch_failed = summary.fetch_failed,
            dry_run = summary.dry_run,
            "Completed reconciliation. Skipped {} rows",
            summary.skipped()
        );

        Ok(summary)
    }

    async fn reconcile_window(
        &self,
        window: BatchWindow,
        rows: Vec<BalanceRow>,
    ) -> Result<WindowOutcome, ReconcileError> {
        let mut outcome = WindowOutcome {
            processed: rows.len() as u64,
            ..WindowOutcome::default()
        };

        let mut token_rows = 0usize;
        let mut queries = Vec::with_capacity(rows.len());
        for row in rows {
            if row.has_token_id {
                token_rows += 1;
                continue;
            }
            match OracleQuery::balance(&row.module, &row.account, &row.chain_id) {
                Ok(query) => queries.push((row, query)),
                Err(e) => {
                    outcome.out_of_scope += 1;
                    warn!(id = row.id, module = %row.module, error = %e, "Skipping balance row");
                },
            }
        }
        outcome.out_of_scope += token_rows as u64;
        if token_rows > 0 {
            debug!(%window, count = token_rows, "Skipping token-id balances");
        }

        let oracle = self.oracle.as_ref();
        let answers = self
            .executor
            .run(queries, move |(row, query)| async move {
                let answer = oracle.query(&query).await;
                (row, answer)
            })
            .await;

        let mut updates = Vec::with_capacity(answers.len());
        for (row, answer) in answers {
            match answer {
                Ok(balance) => {
                    if balance != row.balance {
                        outcome.changed += 1;
                    }
                    updates.push(BalanceUpdate { id: row.id, balance });
                },
                Err(e) => {
                    outcome.fetch_failed += 1;
                    error!(
                        id = row.id,
                        account = %row.account,
                        chain_id = %row.chain_id,
                        module = %row.module,
                        error = %e,
                        "Failed to fetch balance, skipping row"
                    );
                },
            }
        }

        info!(low = window.low, high = window.high, updates = updates.len(), "About to update batch");

        outcome.updated = self
            .store
            .apply_window(window, &updates, self.config.dry_run)
            .await
            .map_err(|source| {
                error!(%window, error = %source, "Failed to commit batch");
                ReconcileError::Commit { window, source }
            })?;

        info!("Processed {} records in this batch", outcome.updated);

        Ok(outcome)
    }
}
