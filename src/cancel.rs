//! Cooperative cancellation token threaded through every suspension point:
//! storage I/O, embedder calls, vector search, index rebuild enumeration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::Error;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable, shareable cancellation signal. Cloning shares the same
/// underlying flag — cancelling any clone cancels all of them.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// A token that can never be cancelled, for call sites with no outer
    /// cancellation scope (e.g. one-off CLI invocations).
    pub fn never() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Error::cancelled())` if already cancelled, `Ok(())`
    /// otherwise. Call at the top of any loop iteration or before starting
    /// a suspension point.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::cancelled())
        } else {
            Ok(())
        }
    }

    /// Resolves when cancelled. Intended for `tokio::select!` racing against
    /// an in-flight I/O future.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }

    /// A child token that is cancelled whenever `self` is cancelled, but can
    /// also be cancelled independently — cancellation never propagates
    /// upward from child to parent.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        let parent = self.clone();
        let child_inner = child.inner.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            child_inner.cancelled.store(true, Ordering::SeqCst);
            child_inner.notify.notify_waiters();
        });
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn child_token_cancels_when_parent_cancels() {
        let parent = CancelToken::new();
        let child = parent.child();
        parent.cancel();
        child.cancelled().await;
        assert!(child.is_cancelled());
    }
}
