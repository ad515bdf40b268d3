//! Progress display for downloads.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Byte-based progress bar for one download
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Create a bar for `total` bytes labelled `name`
    pub fn new(total: u64, name: &str) -> Self {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(name.to_string());
        bar.enable_steady_tick(Duration::from_millis(200));
        Self { bar }
    }

    /// Set the bytes transferred so far
    pub fn update(&self, bytes: u64) {
        self.bar.set_position(bytes);
    }

    /// Shrink the total once the real file length is known
    pub fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    /// Finish and leave the bar with a final message
    pub fn finish_with_message(&self, message: String) {
        self.bar.finish_with_message(message);
    }

    /// Stop without completing
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Human-readable transfer rate
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}
