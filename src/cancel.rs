//! Cooperative cancellation shared between a caller and background work.

use crate::error::{CoreError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A clonable stop signal; every clone observes the same flag.
///
/// Long-running scans poll it at natural boundaries (per window, per match, per block)
/// and stop without producing partial output.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancellationFlag::new();
        let worker = flag.clone();
        assert!(worker.check().is_ok());
        flag.cancel();
        assert!(worker.is_cancelled());
        assert!(matches!(worker.check(), Err(CoreError::Cancelled)));
    }
}
