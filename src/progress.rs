//! Terminal presentation for the client shell
//!
//! Transfer progress bars (indicatif), section headings and human-readable
//! sizes. Nothing here touches the wire.

use crate::transfer::TransferObserver;
use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const UNITS: [&str; 6] = ["b", "kb", "mb", "gb", "tb", "eb"];

/// `1536` -> `"1.50 kb"`. Base 1024, two decimals, stops at `eb`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Byte-counting bar for one upload or download
pub struct BarProgress {
    bar: Option<ProgressBar>,
    visible: bool,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            bar: None,
            visible: true,
        }
    }

    /// Track progress without drawing anything
    pub fn hidden() -> Self {
        Self {
            bar: None,
            visible: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.as_ref().map(|b| b.position()).unwrap_or(0)
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferObserver for BarProgress {
    fn begin(&mut self, name: &str, total: u64) {
        let bar = if self.visible {
            ProgressBar::new(total)
        } else {
            ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::hidden())
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message(format!("file: {}", name));
        self.bar = Some(bar);
    }

    fn advance(&mut self, bytes: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(bytes);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = &self.bar {
            bar.finish();
        }
    }
}

/// Section heading printed before each shell command runs
pub fn heading(title: &str) -> String {
    let rule = "-".repeat(28usize.saturating_sub(title.len() / 2));
    format!(
        "\n{} {} {}\n",
        rule.as_str().with(Color::DarkGrey),
        title.with(Color::Green).bold(),
        rule.as_str().with(Color::DarkGrey)
    )
}

pub fn success(msg: &str) -> String {
    format!("{} {}", "ok".with(Color::Green).bold(), msg)
}

pub fn failure(msg: &str) -> String {
    format!("{} {}", "error".with(Color::Red).bold(), msg)
}
