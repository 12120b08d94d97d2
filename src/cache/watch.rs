//! Watch handle types: the cancellation token that ends a subscription and
//! the stream that delivers its notifications.

use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;

/// Stream of payload-free change notifications for one key.
///
/// Each item only says "something may have changed"; read the key again to
/// learn its current value.
pub type WatchStream = ReceiverStream<()>;

// == Cancel Token ==
/// Cheap clonable handle that observes cancellation of a subscription.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Owning side of a [`CancelToken`]. Dropping it cancels as well.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

/// Creates a linked canceller and token.
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx })
}

impl Canceller {
    /// Fires the token. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Hands out another token linked to this canceller.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// Returns true if cancelled or if the canceller is gone.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // An Err means the canceller was dropped, which counts as cancellation
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
