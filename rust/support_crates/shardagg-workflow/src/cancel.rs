//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is cheap to clone and shared by every task of a request.
//! Long-running loops poll [`CancellationToken::check`] between units of work (document
//! batches, merge steps) and unwind with [`Canceled`] once the token has been canceled
//! explicitly or its deadline has passed.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

#[derive(Clone, Default)]
pub struct CancellationToken(Arc<TokenState>);

#[derive(Default)]
struct TokenState {
    canceled: AtomicBool,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Creates a token that is only canceled by an explicit [`cancel`](Self::cancel) call.
    pub fn new() -> CancellationToken {
        Default::default()
    }

    /// Creates a token that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> CancellationToken {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> CancellationToken {
        CancellationToken(Arc::new(TokenState {
            canceled: AtomicBool::new(false),
            deadline: Some(deadline),
        }))
    }

    /// Requests cancellation. Every clone of this token observes it.
    pub fn cancel(&self) {
        self.0.canceled.store(true, Ordering::Release);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.0.deadline
    }

    pub fn is_canceled(&self) -> bool {
        self.status().is_some()
    }

    /// Returns `Err(Canceled)` if the token has been canceled or timed out.
    pub fn check(&self) -> Result<(), Canceled> {
        match self.status() {
            Some(reason) => Err(Canceled(reason)),
            None => Ok(()),
        }
    }

    fn status(&self) -> Option<CancelReason> {
        if self.0.canceled.load(Ordering::Acquire) {
            return Some(CancelReason::Requested);
        }
        match self.0.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("canceled", &self.0.canceled.load(Ordering::Relaxed))
            .field("deadline", &self.0.deadline)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Requested,
    DeadlineExceeded,
}

/// Returned by [`CancellationToken::check`] once the token is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled(pub CancelReason);

impl std::fmt::Display for Canceled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

impl std::error::Error for Canceled {}
