//! Configuration management
//!
//! Settings come from an env file (loaded with `dotenvy`, never overriding
//! variables already set in the process) and the environment itself.

use backfill_common::{BackfillError, Result};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::db::DbConfig;
use crate::migrate::{CodeToTextConfig, DEFAULT_CODE_BATCH_SIZE, DEFAULT_CODE_START_ID};
use crate::reconcile::{ReconcileConfig, DEFAULT_ORACLE_CONCURRENCY, DEFAULT_RECONCILE_BATCH_SIZE};

// ============================================================================
// Defaults
// ============================================================================

/// Default per-request oracle timeout in seconds.
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 30;

/// Default `endpoint` field attached to failure reports.
pub const DEFAULT_REPORT_ENDPOINT: &str = "backfill";

/// Default number of failure reports waiting for delivery.
pub const DEFAULT_REPORT_QUEUE: usize = 256;

/// Default timeout for one failure-report delivery in seconds.
pub const DEFAULT_REPORT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub oracle: OracleConfig,
    pub code_to_text: CodeToTextSettings,
    pub reconcile: ReconcileSettings,
    pub report: ReportConfig,
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Only required by `reconcile`
    pub url: Option<String>,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct CodeToTextSettings {
    pub batch_size: i64,
    pub start_id: i64,
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub batch_size: i64,
    pub lookback_hours: Option<u64>,
}

/// Failure reporting; disabled when `url` is unset
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub url: Option<String>,
    pub endpoint: String,
    pub queue_capacity: usize,
    pub timeout_secs: u64,
}

impl Config {
    /// Load `env_file` (a missing file is not an error) and read the
    /// environment.
    pub fn load(env_file: &Path) -> Result<Self> {
        match dotenvy::from_path(env_file) {
            Ok(()) => debug!(path = %env_file.display(), "Loaded env file"),
            Err(e) if e.not_found() => {
                debug!(path = %env_file.display(), "No env file, using process environment")
            },
            Err(e) => {
                return Err(BackfillError::config(format!(
                    "Failed to read {}: {}",
                    env_file.display(),
                    e
                )))
            },
        }

        Self::from_env()
    }

    /// Read configuration from the process environment only.
    pub fn from_env() -> Result<Self> {
        let database = DbConfig::from_env().map_err(|e| BackfillError::config(e.to_string()))?;

        let config = Config {
            database,
            oracle: OracleConfig {
                url: non_empty_var("ORACLE_URL"),
                timeout_secs: env_or("ORACLE_TIMEOUT_SECS", DEFAULT_ORACLE_TIMEOUT_SECS),
                concurrency: env_or("ORACLE_CONCURRENCY", DEFAULT_ORACLE_CONCURRENCY),
            },
            code_to_text: CodeToTextSettings {
                batch_size: env_or("CODE_BATCH_SIZE", DEFAULT_CODE_BATCH_SIZE),
                start_id: env_or("CODE_START_ID", DEFAULT_CODE_START_ID),
            },
            reconcile: ReconcileSettings {
                batch_size: env_or("RECONCILE_BATCH_SIZE", DEFAULT_RECONCILE_BATCH_SIZE),
                lookback_hours: parse_var("RECONCILE_LOOKBACK_HOURS")?,
            },
            report: ReportConfig {
                url: non_empty_var("ERROR_REPORT_URL"),
                endpoint: non_empty_var("ERROR_REPORT_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_REPORT_ENDPOINT.to_string()),
                queue_capacity: env_or("ERROR_REPORT_QUEUE", DEFAULT_REPORT_QUEUE),
                timeout_secs: env_or("ERROR_REPORT_TIMEOUT_SECS", DEFAULT_REPORT_TIMEOUT_SECS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.database
            .validate()
            .map_err(|e| BackfillError::config(e.to_string()))?;

        if self.code_to_text.batch_size <= 0 {
            return Err(BackfillError::config("CODE_BATCH_SIZE must be greater than 0"));
        }

        if self.reconcile.batch_size <= 0 {
            return Err(BackfillError::config("RECONCILE_BATCH_SIZE must be greater than 0"));
        }

        if self.oracle.concurrency == 0 {
            return Err(BackfillError::config("ORACLE_CONCURRENCY must be greater than 0"));
        }

        if self.oracle.timeout_secs == 0 {
            return Err(BackfillError::config("ORACLE_TIMEOUT_SECS must be greater than 0"));
        }

        if self.reconcile.lookback_hours.is_some() && self.reconcile.lookback().is_none() {
            return Err(BackfillError::config("RECONCILE_LOOKBACK_HOURS is out of range"));
        }

        Ok(())
    }

    /// The oracle base URL, an error when it is not configured.
    pub fn oracle_url(&self) -> Result<&str> {
        self.oracle
            .url
            .as_deref()
            .ok_or_else(|| BackfillError::config("ORACLE_URL must be set to reconcile balances"))
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle.timeout_secs)
    }

    pub fn code_to_text_job(&self, dry_run: bool) -> CodeToTextConfig {
        CodeToTextConfig {
            batch_size: self.code_to_text.batch_size,
            start_id: self.code_to_text.start_id,
            dry_run,
        }
    }

    pub fn reconcile_job(&self, after: i64, dry_run: bool) -> ReconcileConfig {
        ReconcileConfig {
            batch_size: self.reconcile.batch_size,
            concurrency: self.oracle.concurrency,
            after,
            lookback: self.reconcile.lookback(),
            dry_run,
        }
    }
}

impl ReconcileSettings {
    /// Eligibility window; `None` means every row.
    pub fn lookback(&self) -> Option<chrono::Duration> {
        self.lookback_hours
            .and_then(|hours| i64::try_from(hours).ok())
            .and_then(chrono::Duration::try_hours)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// An optional variable that must parse when present.
fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>> {
    non_empty_var(key)
        .map(|raw| {
            raw.parse()
                .map_err(|_| BackfillError::config(format!("{} has an invalid value '{}'", key, raw)))
        })
        .transpose()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    non_empty_var(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
