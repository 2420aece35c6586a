//! Cooperative cancellation and progress reporting for long builds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{IndexError, Result};

/// Observer polled by long-running construction loops.
pub trait ProgressListener: Send + Sync {
    fn is_canceled(&self) -> bool {
        false
    }

    fn begin_task(&self, _name: &str, _total_work: u64) {}

    fn worked(&self, _units: u64) {}

    /// `Err(Canceled)` once cancellation was requested.
    fn check_canceled(&self) -> Result<()> {
        if self.is_canceled() {
            Err(IndexError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Listener that never cancels and ignores progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl ProgressListener for Silent {}

/// Shared cancel switch that also counts reported work.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag {
    canceled: Arc<AtomicBool>,
    worked: Arc<AtomicU64>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn work_done(&self) -> u64 {
        self.worked.load(Ordering::Relaxed)
    }
}

impl ProgressListener for CancelFlag {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    fn worked(&self, units: u64) {
        self.worked.fetch_add(units, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check_canceled().is_ok());

        other.cancel();
        assert!(flag.is_canceled());
        assert!(flag.check_canceled().unwrap_err().is_canceled());
    }

    #[test]
    fn test_worked_accumulates() {
        let flag = CancelFlag::new();
        flag.worked(3);
        flag.clone().worked(4);
        assert_eq!(flag.work_done(), 7);
        assert!(!Silent.is_canceled());
    }
}
