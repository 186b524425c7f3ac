//! Window generation over an ordering key
//!
//! Two traversal orders are supported:
//!
//! - [`DescendingWindows`]: fixed-size windows from the top of a known range
//!   down to its start. Used by migrations that rewrite every row once.
//! - [`AscendingCursor`]: keyset pagination ("rows with key greater than the
//!   last one seen"), which keeps working while new rows are inserted above
//!   the scan point.
//!
//! Timestamp-keyed tables use [`DescendingTimeWindows`], which maps instants
//! to epoch seconds and walks them with the same descending generator.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Window size must be greater than 0")]
    ZeroSize,
}

/// Closed interval `[low, high]` over the ordering key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchWindow {
    pub low: i64,
    pub high: i64,
}

impl BatchWindow {
    pub fn new(low: i64, high: i64) -> Self {
        debug_assert!(low <= high, "window low bound above high bound");
        Self { low, high }
    }

    /// Number of keys covered by the window
    pub fn span(&self) -> u64 {
        self.high.abs_diff(self.low) + 1
    }

    pub fn contains(&self, key: i64) -> bool {
        key >= self.low && key <= self.high
    }
}

impl fmt::Display for BatchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// Walks `[range_start, range_end]` from the top down in windows of at most
/// `window_size` keys. The last window is clamped to `range_start`.
#[derive(Debug, Clone)]
pub struct DescendingWindows {
    range_start: i64,
    next_high: Option<i64>,
    window_size: i64,
}

impl DescendingWindows {
    /// An empty range (`range_end < range_start`) yields no windows.
    pub fn new(range_start: i64, range_end: i64, window_size: i64) -> Result<Self, WindowError> {
        if window_size <= 0 {
            return Err(WindowError::ZeroSize);
        }

        Ok(Self {
            range_start,
            next_high: (range_end >= range_start).then_some(range_end),
            window_size,
        })
    }

    /// True when there is nothing left to scan
    pub fn is_exhausted(&self) -> bool {
        self.next_high.is_none()
    }

    /// Highest key not yet handed out
    pub fn boundary(&self) -> Option<i64> {
        self.next_high
    }

    /// The window that follows `previous`, computed from its boundary alone.
    pub fn next_after(&self, previous: BatchWindow) -> Option<BatchWindow> {
        if previous.low <= self.range_start {
            return None;
        }
        self.window_at(previous.low - 1)
    }

    fn window_at(&self, high: i64) -> Option<BatchWindow> {
        if high < self.range_start {
            return None;
        }
        let low = high
            .saturating_sub(self.window_size - 1)
            .max(self.range_start);
        Some(BatchWindow::new(low, high))
    }
}

impl Iterator for DescendingWindows {
    type Item = BatchWindow;

    fn next(&mut self) -> Option<Self::Item> {
        let window = self.window_at(self.next_high?)?;
        self.next_high = if window.low > self.range_start {
            Some(window.low - 1)
        } else {
            None
        };
        Some(window)
    }
}

/// Keyset cursor for ascending scans
///
/// Each page the caller fetches ("up to `batch_size` rows with key greater
/// than [`position`](Self::position)") becomes the window
/// `[position + 1, last key of the page]`.
#[derive(Debug, Clone)]
pub struct AscendingCursor {
    after: i64,
    batch_size: i64,
}

impl AscendingCursor {
    pub fn new(after: i64, batch_size: i64) -> Result<Self, WindowError> {
        if batch_size <= 0 {
            return Err(WindowError::ZeroSize);
        }
        Ok(Self { after, batch_size })
    }

    /// Last key covered so far; the next page starts strictly above it.
    pub fn position(&self) -> i64 {
        self.after
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// Advance past a fetched page whose highest key is `last_key`.
    ///
    /// `None` means the page was empty and the scan is finished.
    pub fn advance(&mut self, last_key: Option<i64>) -> Option<BatchWindow> {
        let last_key = last_key?;
        if last_key <= self.after {
            return None;
        }
        let window = BatchWindow::new(self.after + 1, last_key);
        self.after = last_key;
        Some(window)
    }
}

/// Closed interval of instants at one-second resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// `None` when either bound is outside the representable range.
    pub fn from_epoch(window: BatchWindow) -> Option<Self> {
        Some(Self {
            start: DateTime::from_timestamp(window.low, 0)?,
            end: DateTime::from_timestamp(window.high, 0)?,
        })
    }

    /// The same window in epoch seconds, as the progress tracker counts it
    pub fn as_epoch(&self) -> BatchWindow {
        BatchWindow::new(self.start.timestamp(), self.end.timestamp())
    }

    /// Sub-second parts are ignored, so the whole last second is included.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.as_epoch().contains(instant.timestamp())
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Walks `[start, end]` from the newest instant down in windows at most
/// `width` long. Bounds are truncated to whole seconds.
#[derive(Debug, Clone)]
pub struct DescendingTimeWindows {
    inner: DescendingWindows,
}

impl DescendingTimeWindows {
    /// A width under one second is rejected like a zero window size.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, width: chrono::Duration) -> Result<Self, WindowError> {
        let width = width.num_seconds();
        if width <= 0 {
            return Err(WindowError::ZeroSize);
        }

        Ok(Self {
            inner: DescendingWindows::new(start.timestamp(), end.timestamp(), width)?,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }

    /// Newest instant not yet handed out
    pub fn boundary(&self) -> Option<DateTime<Utc>> {
        self.inner
            .boundary()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn next_after(&self, previous: TimeWindow) -> Option<TimeWindow> {
        self.inner
            .next_after(previous.as_epoch())
            .and_then(TimeWindow::from_epoch)
    }
}

impl Iterator for DescendingTimeWindows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().and_then(TimeWindow::from_epoch)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, min, sec).unwrap()
    }

    #[test]
    fn test_descending_windows_clamp_to_start() {
        let windows: Vec<_> = DescendingWindows::new(1, 1205, 500).unwrap().collect();
        assert_eq!(
            windows,
            vec![
                BatchWindow::new(706, 1205),
                BatchWindow::new(206, 705),
                BatchWindow::new(1, 205),
            ]
        );
    }

    #[test]
    fn test_empty_range_yields_nothing() {
        let mut windows = DescendingWindows::new(1, 0, 500).unwrap();
        assert!(windows.is_exhausted());
        assert_eq!(windows.next(), None);
    }

    #[test]
    fn test_zero_window_size_rejected() {
        assert_eq!(DescendingWindows::new(1, 10, 0).unwrap_err(), WindowError::ZeroSize);
        assert_eq!(AscendingCursor::new(0, 0).unwrap_err(), WindowError::ZeroSize);
    }

    #[test]
    fn test_next_after_matches_iteration() {
        let generator = DescendingWindows::new(1, 1205, 500).unwrap();
        let first = BatchWindow::new(706, 1205);
        let second = generator.next_after(first).unwrap();
        assert_eq!(second, BatchWindow::new(206, 705));
        let third = generator.next_after(second).unwrap();
        assert_eq!(third, BatchWindow::new(1, 205));
        assert_eq!(generator.next_after(third), None);
    }

    #[test]
    fn test_single_key_range() {
        let windows: Vec<_> = DescendingWindows::new(7, 7, 500).unwrap().collect();
        assert_eq!(windows, vec![BatchWindow::new(7, 7)]);
    }

    #[test]
    fn test_ascending_cursor_pages() {
        let mut cursor = AscendingCursor::new(0, 3).unwrap();
        assert_eq!(cursor.advance(Some(3)), Some(BatchWindow::new(1, 3)));
        // Gaps in the key space still produce contiguous windows.
        assert_eq!(cursor.advance(Some(10)), Some(BatchWindow::new(4, 10)));
        assert_eq!(cursor.position(), 10);
        assert_eq!(cursor.advance(None), None);
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn test_time_windows_clamp_to_start() {
        let windows: Vec<_> = DescendingTimeWindows::new(at(0, 0, 0), at(2, 30, 0), Duration::hours(1))
            .unwrap()
            .collect();
        assert_eq!(
            windows,
            vec![
                TimeWindow { start: at(1, 30, 1), end: at(2, 30, 0) },
                TimeWindow { start: at(0, 30, 1), end: at(1, 30, 0) },
                TimeWindow { start: at(0, 0, 0), end: at(0, 30, 0) },
            ]
        );
        assert_eq!(windows[2].to_string(), "[2024-01-01T00:00:00Z, 2024-01-01T00:30:00Z]");
    }

    #[test]
    fn test_time_window_bounds_and_resume() {
        let mut generator = DescendingTimeWindows::new(at(0, 0, 0), at(0, 0, 59), Duration::seconds(30)).unwrap();
        assert_eq!(generator.boundary(), Some(at(0, 0, 59)));

        let first = generator.next().unwrap();
        assert_eq!(first.as_epoch().span(), 30);
        assert_eq!(generator.boundary(), Some(at(0, 0, 29)));
        assert!(first.contains(at(0, 0, 59) + Duration::milliseconds(900)));
        assert!(!first.contains(at(0, 0, 29) + Duration::milliseconds(900)));

        let second = generator.next_after(first).unwrap();
        assert_eq!(Some(second), generator.next());
        assert!(generator.is_exhausted());
        assert_eq!(generator.next_after(second), None);
    }

    #[test]
    fn test_sub_second_width_rejected() {
        for width in [Duration::zero(), Duration::milliseconds(500), Duration::seconds(-5)] {
            assert_eq!(
                DescendingTimeWindows::new(at(0, 0, 0), at(1, 0, 0), width).unwrap_err(),
                WindowError::ZeroSize
            );
        }
    }

    #[test]
    fn test_time_range_ending_before_start_is_empty() {
        let mut generator = DescendingTimeWindows::new(at(1, 0, 0), at(0, 0, 0), Duration::hours(1)).unwrap();
        assert!(generator.is_exhausted());
        assert_eq!(generator.next(), None);
    }

    proptest! {
        #[test]
        fn prop_descending_time_windows_partition_range(
            start_secs in 1_500_000_000i64..1_800_000_000,
            len in 0i64..200_000,
            width in 1i64..20_000,
        ) {
            let start = DateTime::from_timestamp(start_secs, 0).unwrap();
            let end = DateTime::from_timestamp(start_secs + len - 1, 0).unwrap();
            let windows: Vec<_> = DescendingTimeWindows::new(start, end, Duration::seconds(width))
                .unwrap()
                .collect();

            if len == 0 {
                prop_assert!(windows.is_empty());
            } else {
                prop_assert_eq!(windows.first().unwrap().end, end);
                prop_assert_eq!(windows.last().unwrap().start, start);
                for pair in windows.windows(2) {
                    prop_assert_eq!(pair[1].end + Duration::seconds(1), pair[0].start);
                }
                let mut covered = 0u64;
                for window in &windows {
                    prop_assert!(window.start <= window.end);
                    let span = window.as_epoch().span();
                    prop_assert!(span <= width as u64);
                    covered += span;
                }
                prop_assert_eq!(covered, len as u64);
            }
        }

        #[test]
        fn prop_descending_windows_partition_range(
            start in -5_000i64..5_000,
            len in 0i64..20_000,
            size in 1i64..3_000,
        ) {
            let end = start + len - 1;
            let windows: Vec<_> = DescendingWindows::new(start, end, size).unwrap().collect();

            if len == 0 {
                prop_assert!(windows.is_empty());
            } else {
                prop_assert_eq!(windows.first().unwrap().high, end);
                prop_assert_eq!(windows.last().unwrap().low, start);
                for pair in windows.windows(2) {
                    prop_assert_eq!(pair[1].high, pair[0].low - 1);
                }
                let mut covered = 0u64;
                for window in &windows {
                    prop_assert!(window.low <= window.high);
                    prop_assert!(window.span() <= size as u64);
                    covered += window.span();
                }
                prop_assert_eq!(covered, len as u64);
            }
        }

        #[test]
        fn prop_ascending_cursor_windows_are_contiguous(
            after in -1_000i64..1_000,
            steps in proptest::collection::vec(1i64..500, 0..40),
        ) {
            let mut steps = steps;
            let mut cursor = AscendingCursor::new(after, 100).unwrap();
            let mut last = after;
            steps.sort_unstable();
            for step in steps {
                let key = after + step;
                match cursor.advance(Some(key)) {
                    Some(window) => {
                        prop_assert_eq!(window.low, last + 1);
                        prop_assert_eq!(window.high, key);
                        last = key;
                    }
                    None => prop_assert!(key <= last),
                }
            }
            prop_assert_eq!(cursor.position(), last);
        }
    }
}
