//! Throttled warnings while the collector is unreachable.
//!
//! Every send that ends with its payload buffered (no connection, or a
//! failed write) is counted. At most one warning per interval is logged,
//! summarising how many payloads were held back since the previous warning,
//! how large the backlog has grown and what the last failure was.

use log::warn;
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::SenderError;

#[derive(Debug, Default)]
struct Window {
    last_warn: Option<Instant>,
    held_back: u64,
}

/// Rate-limited reporter for payloads that could not be delivered.
#[derive(Debug)]
pub struct UnsentWarner {
    label: String,
    interval: Duration,
    window: Mutex<Window>,
}

impl UnsentWarner {
    /// Warn at most once per `interval`, prefixing messages with `label`.
    pub fn new(label: impl Into<String>, interval: Duration) -> Self {
        Self {
            label: label.into(),
            interval,
            window: Mutex::new(Window::default()),
        }
    }

    /// Count one held-back payload and warn if the interval has elapsed.
    ///
    /// The first payload after a quiet period is reported immediately.
    /// Returns whether a warning was logged.
    pub fn record_unsent(&self, backlog_bytes: usize, last_error: Option<&SenderError>) -> bool {
        let now = Instant::now();
        let held_back = {
            let mut window = self.window.lock();
            window.held_back += 1;
            let due = window
                .last_warn
                .is_none_or(|at| now.saturating_duration_since(at) >= self.interval);
            if !due {
                return false;
            }
            window.last_warn = Some(now);
            std::mem::take(&mut window.held_back)
        };
        match last_error {
            Some(error) => warn!(
                "{}: {held_back} payloads held back, {backlog_bytes} bytes buffered (last error: {error})",
                self.label
            ),
            None => warn!(
                "{}: {held_back} payloads held back, {backlog_bytes} bytes buffered",
                self.label
            ),
        }
        true
    }

    /// Payloads counted since the last warning.
    pub fn held_back(&self) -> u64 {
        self.window.lock().held_back
    }
}
