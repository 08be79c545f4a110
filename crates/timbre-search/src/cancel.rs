//! Cooperative cancellation.
//!
//! A search never spawns threads or times itself out. Callers that run it on
//! a worker inject a predicate (or an atomic flag) and the engine consults it
//! at fixed strides inside every expensive loop. A positive answer aborts the
//! whole call with [`Error::Cancelled`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Number of loop iterations between two predicate checks.
pub const CHECK_STRIDE: usize = 256;

/// Cancellation predicate type.
pub type CancelPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Injected cancellation source.
#[derive(Clone, Default)]
pub struct CancellationToken {
    predicate: Option<CancelPredicate>,
}

impl CancellationToken {
    /// A token that never cancels.
    pub fn never() -> Self {
        Self { predicate: None }
    }

    /// Build a token from an arbitrary predicate.
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
        }
    }

    /// Build a token observing a shared flag.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self::from_fn(move || flag.load(Ordering::Relaxed))
    }

    /// Query the predicate once.
    pub fn is_cancelled(&self) -> bool {
        self.predicate.as_ref().map_or(false, |p| p())
    }

    /// Fail with [`Error::Cancelled`] if the predicate fires.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Start a strided checkpoint for one loop.
    pub fn checkpoint(&self) -> Checkpoint<'_> {
        Checkpoint {
            token: self,
            counter: 0,
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("armed", &self.predicate.is_some())
            .finish()
    }
}

/// Loop-local stride counter. The first tick always consults the token.
pub struct Checkpoint<'a> {
    token: &'a CancellationToken,
    counter: usize,
}

impl Checkpoint<'_> {
    /// Count one iteration, checking the token every [`CHECK_STRIDE`] ticks.
    #[inline]
    pub fn tick(&mut self) -> Result<()> {
        let due = self.counter % CHECK_STRIDE == 0;
        self.counter = self.counter.wrapping_add(1);
        if due {
            self.token.check()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_never_token() {
        let token = CancellationToken::never();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_flag_token() {
        let flag = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::from_flag(flag.clone());
        assert!(token.check().is_ok());

        flag.store(true, Ordering::Relaxed);
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_checkpoint_stride() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let token = CancellationToken::from_fn(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            false
        });

        let mut checkpoint = token.checkpoint();
        for _ in 0..(CHECK_STRIDE * 2 + 1) {
            checkpoint.tick().unwrap();
        }

        // Iterations 0, 256 and 512
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_debug_does_not_call_predicate() {
        let token = CancellationToken::from_fn(|| panic!("must not be called"));
        assert!(format!("{:?}", token).contains("armed: true"));
    }
}
