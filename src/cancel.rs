//! Cooperative cancellation for every suspension point.
//!
//! The engine's notion of cancellation is a plain flag, not drop-based: a token can
//! be cloned, handed down into a chain adapter call, and raced against the call's
//! own future. Firing it never unwinds anything by itself, the racing future has to
//! notice.

use tokio::sync::watch;

/// A cooperative cancellation token.
///
/// Cloning a `CancelToken` shares the same underlying flag. `child()` creates an
/// independent token that is cancelled whenever either the parent or the child's own
/// `cancel()` fires, mirroring an `AbortSignal` composed with a user-provided signal.
#[derive(Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Mark this token (and every clone and child of it) as cancelled.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once this token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// A derived token, cancelled whenever `self` is (in addition to its own `cancel()`).
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let parent_rx = self.rx.clone();
        let child_tx = child.tx.clone();
        if *parent_rx.borrow() {
            let _ = child_tx.send(true);
        } else {
            let mut parent_rx = parent_rx;
            tokio::spawn(async move {
                if parent_rx.changed().await.is_ok() && *parent_rx.borrow() {
                    let _ = child_tx.send(true);
                }
            });
        }
        child
    }

    /// Race `fut` against cancellation and an optional timeout, collapsing both into
    /// the distinguishable errors the retry policy expects.
    pub async fn race<T, F>(&self, timeout: std::time::Duration, fut: F) -> crate::error::Result<T>
    where
        F: std::future::Future<Output = crate::error::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(crate::error::Error::CancellationError),
            res = tokio::time::timeout(timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(crate::error::Error::Timeout(timeout)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_observed_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn child_inherits_parent_cancellation() {
        let parent = CancelToken::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        child.cancelled().await;
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn race_surfaces_cancellation_error() {
        let token = CancelToken::new();
        token.cancel();
        let result = token
            .race(std::time::Duration::from_secs(5), async {
                Ok::<_, crate::error::Error>(())
            })
            .await;
        assert!(matches!(result, Err(crate::error::Error::CancellationError)));
    }

    #[tokio::test]
    async fn race_surfaces_timeout_error() {
        let token = CancelToken::new();
        let result = token
            .race(std::time::Duration::from_millis(10), async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok::<_, crate::error::Error>(())
            })
            .await;
        assert!(matches!(result, Err(crate::error::Error::Timeout(_))));
    }
}
