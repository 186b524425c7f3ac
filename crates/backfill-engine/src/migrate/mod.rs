//! `code` → `codetext` conversion of `TransactionDetails`
//!
//! Converting the whole table in one statement exhausts memory on large
//! databases, so the conversion walks the id space from the top down in
//! fixed windows. Each window is handled in its own transaction:
//!
//! 1. read every row in the window and validate its shape,
//! 2. convert the window with one set-based `UPDATE`,
//! 3. commit.
//!
//! A row with an unexpected shape aborts the job before its window is
//! written. Windows committed earlier stay committed; a restart picks up at
//! the highest row that still needs converting.

pub mod store;
pub mod validator;

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::DbError;
use crate::progress::{ProgressTracker, ScanDirection};
use crate::window::{BatchWindow, DescendingWindows, WindowError};

pub use store::{MigrationStore, PgMigrationStore, RawCodeRow, WindowSession};
pub use validator::{code_shape, validate_window, CodeShape, InvalidRow};

/// Default number of ids per window.
pub const DEFAULT_CODE_BATCH_SIZE: i64 = 500;

/// Default lowest id to convert.
pub const DEFAULT_CODE_START_ID: i64 = 1;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Invalid window configuration: {0}")]
    Window(#[from] WindowError),

    #[error("Failed to read resume boundary: {0}")]
    Boundary(#[source] DbError),

    #[error("ABORTING: invalid code value at id {id} in batch {window}: {value}")]
    InvalidCode {
        id: i64,
        window: BatchWindow,
        value: String,
    },

    #[error("Failed to process batch {window}: {source}")]
    Store {
        window: BatchWindow,
        #[source]
        source: DbError,
    },
}

#[derive(Debug, Clone)]
pub struct CodeToTextConfig {
    pub batch_size: i64,
    pub start_id: i64,
    /// Validate and convert every window, then roll it back
    pub dry_run: bool,
}

impl Default for CodeToTextConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_CODE_BATCH_SIZE,
            start_id: DEFAULT_CODE_START_ID,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// `[start_id, boundary]` scanned by this run, `None` when nothing was pending
    pub range: Option<BatchWindow>,
    pub windows: u64,
    /// Rows whose value was a string and therefore converted to text
    pub rows_converted: u64,
    /// Rows touched by the conversion statement
    pub rows_updated: u64,
    pub dry_run: bool,
}

pub struct CodeToTextJob {
    store: Arc<dyn MigrationStore>,
    config: CodeToTextConfig,
}

impl CodeToTextJob {
    pub fn new(store: Arc<dyn MigrationStore>, config: CodeToTextConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self) -> Result<MigrationSummary, MigrationError> {
        let boundary = self
            .store
            .resume_boundary()
            .await
            .map_err(MigrationError::Boundary)?;

        let mut summary = MigrationSummary {
            dry_run: self.config.dry_run,
            ..MigrationSummary::default()
        };

        let end = match boundary {
            Some(end) if end >= self.config.start_id => end,
            _ => {
                info!("No TransactionDetails pending conversion; nothing to update");
                return Ok(summary);
            },
        };

        let windows = DescendingWindows::new(self.config.start_id, end, self.config.batch_size)?;
        let range = BatchWindow::new(self.config.start_id, end);
        summary.range = Some(range);

        info!(
            "Starting to process TransactionDetails from id {} down to {}",
            range.high, range.low
        );
        info!("Total ids to process: {}", range.span());

        let mut tracker =
            ProgressTracker::new("code-to-text", ScanDirection::Descending, range.low, range.high);

        for window in windows {
            let (converted, updated) = self.process_window(window).await?;

            summary.windows += 1;
            summary.rows_converted += converted;
            summary.rows_updated += updated;
            tracker.record(window, updated);
        }

        tracker.finish();
        info!(
            windows = summary.windows,
            rows_converted = summary.rows_converted,
            dry_run = summary.dry_run,
            "Completed code-to-text. Total TransactionDetails updated: {}",
            summary.rows_updated
        );

        Ok(summary)
    }

    /// Validate then convert one window inside a single transaction.
    async fn process_window(&self, window: BatchWindow) -> Result<(u64, u64), MigrationError> {
        let store_err = |source: DbError| MigrationError::Store { window, source };

        let mut session = self.store.begin_window().await.map_err(store_err)?;

        let rows = match session.fetch_window(window).await {
            Ok(rows) => rows,
            Err(source) => {
                rollback_quietly(session, window).await;
                return Err(store_err(source));
            },
        };

        let converted = match validate_window(window, &rows) {
            Ok(converted) => converted,
            Err(invalid) => {
                rollback_quietly(session, window).await;
                error!(
                    id = invalid.id,
                    low = window.low,
                    high = window.high,
                    value = %invalid.value,
                    "ABORTING: Found invalid code value"
                );
                return Err(MigrationError::InvalidCode {
                    id: invalid.id,
                    window,
                    value: invalid.value,
                });
            },
        };

        info!(low = window.low, high = window.high, "About to update batch");

        let updated = match session.convert_window(window).await {
            Ok(updated) => updated,
            Err(source) => {
                rollback_quietly(session, window).await;
                return Err(store_err(source));
            },
        };

        if self.config.dry_run {
            session.rollback().await.map_err(store_err)?;
        } else {
            session.commit().await.map_err(store_err)?;
        }

        info!("Processed {} records in this batch", updated);

        Ok((converted, updated))
    }
}

async fn rollback_quietly(session: Box<dyn WindowSession>, window: BatchWindow) {
    if let Err(e) = session.rollback().await {
        warn!(error = %e, %window, "Rollback failed; the transaction is discarded with its connection");
    }
}
