use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Byte-level progress for one archive transfer.
///
/// Shows a bar when the server declares a content length and a spinner
/// otherwise.
pub struct TransferProgress {
    bar: ProgressBar,
    transferred: u64,
}

impl TransferProgress {
    pub fn new(label: &str, total: Option<u64>) -> Self {
        let bar = match total {
            Some(len) if len > 0 => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{spinner:.green} {msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] \
                             {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                bar
            }
            _ => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        TransferProgress {
            bar,
            transferred: 0,
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.transferred += bytes;
        self.bar.inc(bytes);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Leave the bar in place with a failure note
    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}
