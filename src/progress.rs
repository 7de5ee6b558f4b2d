// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Progress reporting.
//!
//! The engine reports through the [`ProgressReporter`] capability and never
//! renders anything itself. Per collection it calls `start(total, label)` once
//! (only when there is something to transfer), `advance(copied)` with the
//! cumulative count after every committed batch, and `stop()` exactly once
//! when the collection is done, even if it was skipped before any transfer.
//! [`ProgressSession`] enforces that sequence, including on early return.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Receives per-collection progress events.
pub trait ProgressReporter: Send + Sync {
    /// A collection transfer begins.
    fn start(&self, total: u64, label: &str);

    /// Documents processed so far in the current collection.
    fn advance(&self, processed: u64);

    /// The current collection is done (successfully or not).
    fn stop(&self);
}

/// Reporter that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgress;

impl ProgressReporter for NoOpProgress {
    fn start(&self, _total: u64, _label: &str) {}
    fn advance(&self, _processed: u64) {}
    fn stop(&self) {}
}

/// Terminal progress bar on stderr.
#[derive(Default)]
pub struct TerminalProgress {
    bar: Mutex<Option<ProgressBar>>,
}

const BAR_TEMPLATE: &str = "{prefix:>20} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {per_sec}";

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for TerminalProgress {
    fn start(&self, total: u64, label: &str) {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_prefix(label.to_string());

        if let Ok(mut slot) = self.bar.lock() {
            if let Some(previous) = slot.replace(bar) {
                previous.abandon();
            }
        }
    }

    fn advance(&self, processed: u64) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_position(processed);
            }
        }
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish();
            }
        }
    }
}

/// One collection's progress lifecycle.
///
/// Created when processing of a collection begins. `start` is forwarded at
/// most once and only when `total > 0`; `advance` only after it. `stop` always
/// runs on drop, whether the collection was copied, failed or skipped.
pub struct ProgressSession {
    reporter: Arc<dyn ProgressReporter>,
    label: String,
    started: AtomicBool,
}

impl ProgressSession {
    pub fn new(reporter: Arc<dyn ProgressReporter>, label: &str) -> Self {
        Self {
            reporter,
            label: label.to_string(),
            started: AtomicBool::new(false),
        }
    }

    /// Announce the transfer total. Called right before the first batch.
    pub fn start(&self, total: u64) {
        if total > 0 && !self.started.swap(true, Ordering::AcqRel) {
            self.reporter.start(total, &self.label);
        }
    }

    /// Report the cumulative processed count.
    pub fn advance(&self, processed: u64) {
        if self.started.load(Ordering::Acquire) {
            self.reporter.advance(processed);
        }
    }
}

impl Drop for ProgressSession {
    fn drop(&mut self) {
        self.reporter.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for Recorder {
        fn start(&self, total: u64, label: &str) {
            self.events.lock().unwrap().push(format!("start {label} {total}"));
        }
        fn advance(&self, processed: u64) {
            self.events.lock().unwrap().push(format!("advance {processed}"));
        }
        fn stop(&self) {
            self.events.lock().unwrap().push("stop".to_string());
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let recorder = Arc::new(Recorder::default());
        {
            let session = ProgressSession::new(recorder.clone(), "users");
            session.start(3);
            session.advance(2);
            session.advance(3);
        }
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start users 3", "advance 2", "advance 3", "stop"]
        );
    }

    #[test]
    fn test_zero_total_still_stops() {
        let recorder = Arc::new(Recorder::default());
        {
            let session = ProgressSession::new(recorder.clone(), "empty");
            session.start(0);
            session.advance(0);
        }
        assert_eq!(*recorder.events.lock().unwrap(), vec!["stop"]);
    }

    #[test]
    fn test_skipped_before_start_still_stops() {
        let recorder = Arc::new(Recorder::default());
        drop(ProgressSession::new(recorder.clone(), "dry"));
        assert_eq!(*recorder.events.lock().unwrap(), vec!["stop"]);
    }

    #[test]
    fn test_start_forwarded_once() {
        let recorder = Arc::new(Recorder::default());
        {
            let session = ProgressSession::new(recorder.clone(), "c");
            session.start(4);
            session.start(4);
            session.advance(4);
        }
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start c 4", "advance 4", "stop"]
        );
    }

    #[test]
    fn test_stop_on_early_return() {
        fn transfer(reporter: Arc<dyn ProgressReporter>) -> Result<(), &'static str> {
            let session = ProgressSession::new(reporter, "c");
            session.start(10);
            Err("write failed")
        }

        let recorder = Arc::new(Recorder::default());
        assert!(transfer(recorder.clone()).is_err());
        assert_eq!(*recorder.events.lock().unwrap(), vec!["start c 10", "stop"]);
    }

    #[test]
    fn test_terminal_progress_hidden_lifecycle() {
        // No terminal in tests: indicatif draws nowhere, calls must still be safe
        let progress = TerminalProgress::new();
        progress.advance(5);
        progress.start(10, "orders");
        progress.advance(5);
        progress.start(4, "users");
        progress.stop();
        progress.stop();
    }
}
