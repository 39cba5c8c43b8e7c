//! Periodic throughput reporting.
//!
//! The reporter is an observer: it only reads a shared counter that the
//! pipeline increments, and logs average and current items per second.

use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default reporting interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Background thread logging throughput of a counter.
///
/// Stops when dropped.
pub struct ProgressReporter {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Starts reporting on `counter` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(counter: Arc<AtomicU64>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("uq-progress".to_string())
            .spawn(move || {
                let start = Instant::now();
                let mut last_items = 0;
                let mut last_at = start;
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    let items = counter.load(Ordering::Relaxed);
                    let now = Instant::now();
                    tracing::info!(
                        items,
                        avg_per_sec = rate(items, now - start),
                        cur_per_sec = rate(items.saturating_sub(last_items), now - last_at),
                        "Progress"
                    );
                    last_items = items;
                    last_at = now;
                }
            })
            .map_err(|e| Error::operation("progress_spawn", e))?;

        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        // Closing the channel wakes the thread.
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Items per second, rounded down.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rate(items: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0;
    }
    (items as f64 / secs) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate() {
        assert_eq!(rate(1000, Duration::from_secs(2)), 500);
        assert_eq!(rate(5, Duration::ZERO), 0);
        assert_eq!(rate(3, Duration::from_millis(500)), 6);
    }

    #[test]
    fn test_reporter_stops_on_drop() {
        let counter = Arc::new(AtomicU64::new(0));
        let reporter = ProgressReporter::spawn(Arc::clone(&counter), Duration::from_millis(5)).unwrap();
        counter.fetch_add(10, Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        drop(reporter);
        // The thread dropped its clone of the counter when it exited.
        assert_eq!(Arc::strong_count(&counter), 1);
    }
}
