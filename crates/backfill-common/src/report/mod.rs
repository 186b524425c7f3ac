//! Failure classification and reporting
//!
//! Every error-level `tracing` event passes through [`FailureReportLayer`],
//! which turns it into a [`FailureReport`], assigns a [`Severity`], and hands
//! it to a bounded queue. A detached worker drains the queue into a
//! [`FailureSink`]. The emitting code never waits on the sink and never sees
//! its failures.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use backfill_common::logging::{init_logging, LogConfig};
//! use backfill_common::report::{spawn_reporter, HttpFailureSink};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let sink = HttpFailureSink::new("https://alerts.example/report", Duration::from_secs(5))?;
//! let (layer, handle) = spawn_reporter(Arc::new(sink), "backfill", 256);
//! init_logging(&LogConfig::default(), Some(layer))?;
//!
//! tracing::error!("connect ECONNREFUSED 10.0.0.5:5432");
//! handle.drain(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

mod classify;
mod layer;
mod sink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

pub use classify::{classify, phase_for, Phase, Severity};
pub use layer::FailureReportLayer;
pub use sink::{FailureSink, HttpFailureSink, ReportError};

/// Target used by the reporter for its own diagnostics; the layer never
/// reports events from it.
pub const REPORT_TARGET: &str = "backfill_common::report";

/// Where an event was emitted from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callsite {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub module: Option<String>,
}

/// One classified error-level event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    /// Logical service or job name the report is filed under
    pub endpoint: String,
    pub message: String,
    pub severity: Severity,
    pub phase: Phase,
    pub callsite: Callsite,
    pub timestamp: DateTime<Utc>,
    /// Structured fields that accompanied the event
    pub context: serde_json::Map<String, serde_json::Value>,
}

pub(crate) enum Envelope {
    Report(Box<FailureReport>),
    Flush(oneshot::Sender<()>),
}

/// Owner-side handle for the reporting worker
pub struct ReporterHandle {
    tx: mpsc::Sender<Envelope>,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

impl ReporterHandle {
    /// Number of reports discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every report queued before this call was handed to the
    /// sink, or until `timeout` elapses. Returns whether the queue drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        if self.worker.is_finished() {
            return true;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let flushed = async {
            self.tx.send(Envelope::Flush(done_tx)).await.ok()?;
            done_rx.await.ok()
        };

        matches!(tokio::time::timeout(timeout, flushed).await, Ok(Some(())))
    }
}

/// Start the reporting worker and build the subscriber layer that feeds it.
///
/// Must be called from within a tokio runtime. `capacity` bounds the number
/// of reports waiting for delivery.
pub fn spawn_reporter(
    sink: Arc<dyn FailureSink>,
    endpoint: impl Into<String>,
    capacity: usize,
) -> (FailureReportLayer, ReporterHandle) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    let worker = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match envelope {
                Envelope::Report(report) => {
                    if let Err(e) = sink.report(&report).await {
                        warn!(
                            target: REPORT_TARGET,
                            error = %e,
                            severity = %report.severity,
                            "Failed to deliver failure report"
                        );
                    }
                },
                Envelope::Flush(done) => {
                    let _ = done.send(());
                },
            }
        }
    });

    let layer = FailureReportLayer::new(tx.clone(), endpoint.into(), dropped.clone());
    let handle = ReporterHandle {
        tx,
        dropped,
        worker,
    };

    (layer, handle)
}
