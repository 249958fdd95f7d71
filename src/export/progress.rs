//! Export progress reporting
//!
//! Progress bar and counters for long-running exports. Counters are
//! atomic so a future batch-parallel export can share one tracker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Tracks rows written and documents skipped during an export run.
pub struct ProgressTracker {
    processed: AtomicU64,
    skipped: AtomicU64,
    start_time: Instant,
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a tracker.
    ///
    /// # Arguments
    /// * `total` - Source document count if known (None for a spinner)
    /// * `enable_bar` - Whether to display a progress bar
    pub fn new(total: Option<u64>, enable_bar: bool) -> Self {
        let bar = if enable_bar {
            let pb = match total {
                Some(n) => {
                    let bar = ProgressBar::new(n);
                    bar.set_style(
                        ProgressStyle::default_bar()
                            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                            .unwrap()
                            .progress_chars("#>-"),
                    );
                    bar
                }
                None => {
                    let bar = ProgressBar::new_spinner();
                    bar.set_style(
                        ProgressStyle::default_spinner()
                            .template("{spinner:.green} {pos} rows {msg}")
                            .unwrap(),
                    );
                    bar
                }
            };
            Some(pb)
        } else {
            None
        };

        Self {
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Set the total number of rows written so far.
    pub fn update(&self, count: u64) {
        self.processed.store(count, Ordering::Relaxed);

        if let Some(ref bar) = self.bar {
            bar.set_position(count);
            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let speed = count as f64 / elapsed;
                bar.set_message(format!("({speed:.0} rows/sec)"));
            }
        }
    }

    /// Record a document skipped due to a resolution failure.
    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finish and clear the progress bar.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts() {
        let tracker = ProgressTracker::new(Some(1000), false);
        tracker.update(500);
        tracker.record_skip();
        tracker.record_skip();
        assert_eq!(tracker.processed(), 500);
        assert_eq!(tracker.skipped(), 2);
    }

    #[test]
    fn test_tracker_without_total() {
        let tracker = ProgressTracker::new(None, false);
        tracker.update(5);
        assert_eq!(tracker.processed(), 5);
    }
}
