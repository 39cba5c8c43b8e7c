//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A cloneable flag that asks the record source to stop.
///
/// Setting the flag never interrupts work in progress; the [`LineSource`]
/// observes it before its next read and reports end-of-stream, after which
/// the pipeline drains and commits as on a normal end of input.
///
/// [`LineSource`]: super::LineSource
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns true if the token was already cancelled.
    pub fn cancel(&self) -> bool {
        self.cancelled.swap(true, Ordering::SeqCst)
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counts interrupt signals independently of any [`CancellationToken`].
///
/// The token may already be cancelled by a closed output; only a second
/// signal counts as a request to abandon the drain.
#[derive(Debug, Clone, Default)]
pub struct SignalCounter {
    received: Arc<AtomicUsize>,
}

impl SignalCounter {
    /// Creates a counter with no signals recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a signal. Returns true from the second signal on.
    pub fn record(&self) -> bool {
        self.received.fetch_add(1, Ordering::SeqCst) >= 1
    }

    /// Number of signals recorded so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}
