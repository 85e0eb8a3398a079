//! Cancellation context threaded through long-running operations.
//!
//! There are no suspension points in the engine; blocking happens inside
//! storage calls. Long loops (select, merge, index commit) poll
//! [`Cx::checkpoint`] at block boundaries and bail out with a `Cancel`-kind
//! error when a cancel flag or deadline is observed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vellum_error::{Result, VellumError};

/// Cancellation and deadline handle for one logical operation.
///
/// Cloning is cheap; clones observe the same cancel flag.
#[derive(Debug, Clone, Default)]
pub struct Cx {
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl Cx {
    /// A context that never cancels.
    #[must_use]
    pub const fn background() -> Self {
        Self {
            cancel: None,
            deadline: None,
        }
    }

    /// A context driven by an external cancel flag.
    #[must_use]
    pub fn with_cancel(flag: Arc<AtomicBool>) -> Self {
        Self {
            cancel: Some(flag),
            deadline: None,
        }
    }

    /// Derive a context that also expires after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// True once cancellation has been requested or the deadline passed.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return true;
            }
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Poll for cancellation; the single early-exit point for long loops.
    #[inline]
    pub fn checkpoint(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(VellumError::Canceled);
            }
        }
        if let Some(d) = self.deadline {
            if Instant::now() >= d {
                return Err(VellumError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_error::ErrorKind;

    #[test]
    fn test_background_never_cancels() {
        assert!(Cx::background().checkpoint().is_ok());
    }

    #[test]
    fn test_cancel_flag_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let cx = Cx::with_cancel(Arc::clone(&flag));
        assert!(cx.checkpoint().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert_eq!(cx.checkpoint().unwrap_err().kind(), ErrorKind::Cancel);
    }

    #[test]
    fn test_deadline_expires() {
        let cx = Cx::background().with_timeout(Duration::from_secs(0));
        assert_eq!(cx.checkpoint().unwrap_err().kind(), ErrorKind::Cancel);
    }
}
