use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::HistoryError;

/// Cooperative cancellation shared between a caller and in-flight history operations.
///
/// Operations poll the token before touching the store and once per entry file;
/// a read already in progress is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), HistoryError> {
        if self.is_cancelled() {
            return Err(HistoryError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_cancellation() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(worker.check().is_ok());

        token.cancel();

        assert!(worker.is_cancelled());
        assert!(matches!(worker.check(), Err(HistoryError::Cancelled)));
    }
}
