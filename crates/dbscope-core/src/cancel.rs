//! Cooperative cancellation for long catalog, search and export scans.
//!
//! The engine is synchronous. An embedding application that runs a scan on a
//! worker thread keeps a clone of the token and calls `cancel()`; the scan
//! notices between tables and every few hundred rows and returns
//! [`DbscopeError::Cancelled`](crate::error::DbscopeError::Cancelled).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How many rows a scan processes between cancellation checks.
pub(crate) const CHECK_INTERVAL_ROWS: usize = 256;

/// A cancellation token shared between a caller and a running scan.
///
/// # Example
///
/// ```
/// use dbscope_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can drive another operation.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Return early from a scan loop once cancellation was requested.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// Like [`check`](Self::check), but only looks at the flag every
    /// `CHECK_INTERVAL_ROWS` rows.
    pub(crate) fn check_every(&self, processed: usize) -> Result<(), CancelledError> {
        if processed % CHECK_INTERVAL_ROWS == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::DbscopeError {
    fn from(_: CancelledError) -> Self {
        crate::error::DbscopeError::Cancelled
    }
}
