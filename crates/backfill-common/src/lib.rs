//! Backfill Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging, and failure reporting for the backfill
//! workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Logging**: Centralized `tracing` subscriber setup (console, file, JSON)
//! - **Reporting**: A subscriber layer that classifies error-level events and
//!   ships them to an external sink without blocking the caller
//!
//! # Example
//!
//! ```no_run
//! use backfill_common::logging::{init_logging, LogConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config, None)?;
//!     tracing::info!("Backfill started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod report;

// Re-export commonly used types
pub use error::{BackfillError, Result};
