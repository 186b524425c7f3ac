//! Backfill Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Batch repair jobs for the indexer's relational mirror of chain state.
//!
//! # Overview
//!
//! Two jobs share one engine:
//!
//! - **code-to-text** ([`migrate`]): rewrites `TransactionDetails.code` into
//!   `codetext`, walking the id space downward in fixed windows. Every window
//!   is validated before it is written and committed on its own.
//! - **reconcile** ([`reconcile`]): walks `Balances` upward by keyset pages,
//!   asks the node for every fungible balance under bounded concurrency, and
//!   writes the answers back one transaction per page.
//!
//! # Architecture
//!
//! - [`window`]: window generation (descending, by id or by time) and keyset
//!   cursor (ascending)
//! - [`executor`]: bounded fan-out of per-row work inside a window
//! - [`oracle`]: client for the node, the source of truth
//! - [`progress`]: throttled progress lines and the current boundary
//! - [`db`] / [`config`]: pool and environment configuration
//!
//! Windows are processed strictly one after another. Progress is never
//! persisted; a restarted job derives its starting point from the table.

pub mod config;
pub mod db;
pub mod executor;
pub mod migrate;
pub mod oracle;
pub mod progress;
pub mod reconcile;
pub mod window;

pub use config::Config;
pub use migrate::{CodeToTextJob, MigrationError, MigrationSummary};
pub use reconcile::{BalanceReconciler, ReconcileError, ReconcileSummary};
