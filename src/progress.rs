//! Block transfer spinner

use crate::adapter::TransferStats;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Spinner fed by the block transfer callback. Hidden when disabled, so
/// callers can always hand its callback to the transfer.
pub struct BlockProgress {
    spinner: ProgressBar,
    start_time: Instant,
    label: String,
}

impl BlockProgress {
    pub fn new(label: &str, enabled: bool) -> Self {
        let spinner = if enabled {
            let s = ProgressBar::new_spinner();
            s.set_style(
                ProgressStyle::default_spinner()
                    .template("  {spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            s.enable_steady_tick(Duration::from_millis(120));
            s
        } else {
            ProgressBar::hidden()
        };
        Self {
            spinner,
            start_time: Instant::now(),
            label: label.to_string(),
        }
    }

    pub fn update(&self, stats: TransferStats) {
        self.spinner.set_message(format!(
            "{} block {} ({} errors) in {:.1}s",
            self.label,
            stats.total_blocks,
            stats.error_count,
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    pub fn finish(&self, bytes: u64) {
        let secs = self.start_time.elapsed().as_secs_f64();
        let rate = if secs > 0.1 { bytes as f64 / secs } else { 0.0 };
        self.spinner.finish_with_message(format!(
            "{} {} bytes in {:.1}s ({:.0} B/s)",
            self.label, bytes, secs, rate
        ));
    }

    pub fn fail(&self, msg: &str) {
        self.spinner
            .abandon_with_message(format!("{} failed: {}", self.label, msg));
    }
}
