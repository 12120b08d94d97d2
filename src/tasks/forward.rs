//! Watch Forwarding Task
//!
//! One task per `watch` call. It moves signals from the watcher's capacity-1
//! buffer to the consumer's stream, so the store never blocks on a slow
//! consumer while holding its lock.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{CancelToken, WatcherGuard};

/// Spawns the forwarding task for one watcher.
///
/// The task ends when `cancel` fires or the consumer drops its stream.
/// Cancellation is checked before each receive and while a send is pending,
/// but a send that already completed is not taken back.
///
/// The watcher is deregistered when `guard` drops, which happens exactly once
/// whichever way the task ends.
///
/// # Panics
/// If the signal buffer closes while the watcher is still registered. The
/// store holds the sending half for as long as the guard lives, so this only
/// happens if that invariant is broken.
pub(crate) fn spawn_forward_task(
    key: String,
    mut signal: mpsc::Receiver<()>,
    out: mpsc::Sender<()>,
    cancel: CancelToken,
    guard: WatcherGuard,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _guard = guard;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Watch on {} cancelled", key);
                    break;
                }
                received = signal.recv() => {
                    if received.is_none() {
                        panic!("signal buffer for watch on {} closed unexpectedly", key);
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Watch on {} cancelled", key);
                    break;
                }
                sent = out.send(()) => {
                    if sent.is_err() {
                        debug!("Consumer of watch on {} went away", key);
                        break;
                    }
                }
            }
        }
    })
}
