//! Cooperative cancellation for long-running operations.
//!
//! A [`CancellationToken`] is a cheap, cloneable flag checked at coarse
//! grained safe points (between HNSW search candidates, between
//! container segments during compaction). It is not preemptive: a
//! cancelled operation still returns a normal [`crate::error::RvfError`]
//! rather than unwinding immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared cancellation flag.
///
/// Clone to hand the same flag to multiple operations; calling
/// [`CancellationToken::cancel`] on any clone cancels all of them.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(RvfError::Cancelled)` if cancellation has been
    /// requested, otherwise `Ok(())`. Intended to be called at safe
    /// points inside long-running loops via `?`.
    pub fn check(&self, at: &'static str) -> Result<(), crate::error::RvfError> {
        if self.is_cancelled() {
            Err(crate::error::RvfError::cancelled(at))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check("test").is_ok());
    }

    #[test]
    fn test_cancel_observed_via_clone() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check("test").is_err());
    }

    #[test]
    fn test_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
