//! Cooperative cancellation primitive shared across suspension points (spec §5):
//! model streaming, tool invocation, state-store I/O, retry backoff, and
//! summarization calls must all observe this promptly (bounded reaction time).

use tokio::sync::watch;

/// A cheap-to-clone cancellation flag. Firing [`CancelHandle::cancel`] is
/// observed by every clone of the paired [`CancelToken`] within one `watch`
/// channel tick (effectively immediate).
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// The producer half, held by whoever initiates cancellation (typically the
/// caller of [`crate::agent::Agent::run`]).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a linked `(CancelHandle, CancelToken)` pair, initially not cancelled.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// Signal cancellation to every cloned [`CancelToken`].
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    /// A token that never cancels, for callers who don't need the feature.
    #[must_use]
    pub fn never() -> Self {
        cancel_pair().1
    }

    /// Whether cancellation has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation fires. Safe to call repeatedly / from
    /// multiple clones; used with `tokio::select!` at suspension points.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}
