//! Throttled progress reporting and the resumability boundary

use tracing::info;

use crate::window::BatchWindow;

/// Minimum advance, in percentage points, between two progress log lines.
pub const MIN_PROGRESS_DELTA: f64 = 0.1;

/// Which way the scan walks the key space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// From the top key down; the boundary is the next key still to process.
    Descending,
    /// Upward past a cursor; the boundary is the last key covered.
    Ascending,
}

/// Snapshot of a tracker
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub processed_span: u64,
    pub total_span: u64,
    pub last_printed_percent: Option<f64>,
    pub current_boundary: Option<i64>,
    pub rows_processed: u64,
}

#[derive(Debug)]
pub struct ProgressTracker {
    label: &'static str,
    direction: ScanDirection,
    total_span: u64,
    processed_span: u64,
    last_printed_percent: Option<f64>,
    current_boundary: Option<i64>,
    rows_processed: u64,
}

impl ProgressTracker {
    /// Track a scan over `[range_start, range_end]`.
    pub fn new(label: &'static str, direction: ScanDirection, range_start: i64, range_end: i64) -> Self {
        let total_span = if range_end >= range_start {
            range_end.abs_diff(range_start) + 1
        } else {
            0
        };

        let current_boundary = match direction {
            ScanDirection::Descending => Some(range_end),
            ScanDirection::Ascending => Some(range_start.saturating_sub(1)),
        };

        Self {
            label,
            direction,
            total_span,
            processed_span: 0,
            last_printed_percent: None,
            current_boundary,
            rows_processed: 0,
        }
    }

    /// Fraction of the key space covered so far, in percent
    pub fn percent(&self) -> f64 {
        if self.total_span == 0 {
            return 100.0;
        }
        (self.processed_span as f64 / self.total_span as f64) * 100.0
    }

    pub fn current_boundary(&self) -> Option<i64> {
        self.current_boundary
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    /// Record a committed window. Returns the percentage when a progress line
    /// was emitted, `None` when it was throttled.
    pub fn record(&mut self, window: BatchWindow, rows: u64) -> Option<f64> {
        self.processed_span = (self.processed_span + window.span()).min(self.total_span);
        self.rows_processed += rows;
        self.current_boundary = match self.direction {
            ScanDirection::Descending => window.low.checked_sub(1),
            ScanDirection::Ascending => Some(window.high),
        };

        let percent = self.percent();
        let advanced = match self.last_printed_percent {
            Some(last) => percent - last >= MIN_PROGRESS_DELTA,
            None => true,
        };

        if !advanced {
            return None;
        }

        self.last_printed_percent = Some(percent);
        info!(
            job = self.label,
            boundary = ?self.current_boundary,
            rows = self.rows_processed,
            "Progress: {:.1}%",
            percent
        );
        Some(percent)
    }

    /// Emit the final summary line.
    pub fn finish(&self) {
        info!(
            job = self.label,
            "Completed processing. Total rows processed: {} (100.0%)",
            self.rows_processed
        );
    }

    pub fn state(&self) -> ProgressState {
        ProgressState {
            processed_span: self.processed_span,
            total_span: self.total_span,
            last_printed_percent: self.last_printed_percent,
            current_boundary: self.current_boundary,
            rows_processed: self.rows_processed,
        }
    }
}
