use crate::CancelToken;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::time::Duration;

// How often a blocked worker re-checks its cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Create a closed gate and the guard that opens it.
///
/// The [`SyncWaitGate`] half stays with the worker thread, the
/// [`ScopeSignaler`] half travels with the request to the GUI thread. Both
/// halves are consumed on use, so a gate serves exactly one request.
///
/// ```
/// use handheld_syncutils::wait_gate;
///
/// let (gate, signaler) = wait_gate::<String>();
/// let gui = std::thread::spawn(move || signaler.signal("hunter2".to_string()));
/// assert_eq!(gate.wait().as_deref(), Some("hunter2"));
/// gui.join().unwrap();
/// ```
pub fn wait_gate<T>() -> (SyncWaitGate<T>, ScopeSignaler<T>) {
    // One slot: signalling never blocks the GUI thread, even when it
    // answers before the worker has started waiting.
    let (tx, rx) = sync_channel(1);
    (SyncWaitGate { rx }, ScopeSignaler { tx: Some(tx) })
}

/// Worker half of a [`wait_gate`].
#[must_use = "a gate does nothing unless waited on"]
pub struct SyncWaitGate<T> {
    rx: Receiver<T>,
}

impl<T> SyncWaitGate<T> {
    /// Block until the paired [`ScopeSignaler`] is signalled or dropped.
    ///
    /// Returns the value handed to [`ScopeSignaler::signal`], or `None` when
    /// the signaler went out of scope without one (the handler bailed out).
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Like [`wait`](Self::wait), but gives up with `None` as soon as
    /// `token` is cancelled, even if the request was never handled.
    pub fn wait_or_cancel(self, token: &CancelToken) -> Option<T> {
        loop {
            if token.is_cancelled() {
                return self.rx.try_recv().ok();
            }
            match self.rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(value) => return Some(value),
                Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }
}

/// GUI half of a [`wait_gate`].
///
/// Releases the waiting worker exactly once: either explicitly through
/// [`signal`](Self::signal), or unconditionally when dropped, so an early
/// return or a panic in the handler can never strand the worker.
pub struct ScopeSignaler<T> {
    tx: Option<SyncSender<T>>,
}

impl<T> ScopeSignaler<T> {
    /// Release the worker, handing it `value`.
    pub fn signal(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            match tx.try_send(value) {
                Ok(()) => {},
                // The worker stopped waiting (cancelled); nobody to hand it to.
                Err(TrySendError::Disconnected(_)) => tracing::debug!("Wait gate signalled after waiter left"),
                // Unreachable: the slot is only ever filled once.
                Err(TrySendError::Full(_)) => {},
            }
        }
    }
}

impl<T> Drop for ScopeSignaler<T> {
    fn drop(&mut self) {
        // Dropping the sender disconnects the channel, which wakes the
        // waiter with `None`.
        self.tx.take();
    }
}
