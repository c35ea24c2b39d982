use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{sync::oneshot, time::sleep};
use tracing::trace;

/// Sequence number of an operation issued on a leg.
pub type Ticket = u64;

/// Orders the operations issued on one leg and merges bursts of them.
///
/// Every mutation takes a fresh [`Ticket`]. Only the holder of the latest ticket may commit
/// results, every other operation discards what it computed. Before hitting the price sources,
/// an operation waits for a quiet window; a newer operation arriving meanwhile cancels it.
pub struct QuoteCoalescer {
    window: Duration,
    generation: AtomicU64,
    pending: Mutex<Option<(Ticket, oneshot::Sender<()>)>>,
}

impl QuoteCoalescer {
    pub fn new(window: Duration) -> Self {
        Self { window, generation: AtomicU64::new(0), pending: Mutex::new(None) }
    }

    /// Issues a ticket superseding every ticket issued before.
    pub fn issue(&self) -> Ticket {
        self.generation
            .fetch_add(1, Ordering::SeqCst) +
            1
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket
    }

    /// Cancels the operation waiting for its window, if any.
    pub fn cancel_pending(&self) {
        if let Some((ticket, cancel)) = self.pending.lock().take() {
            trace!(ticket, "DebounceCancelled");
            let _ = cancel.send(());
        }
    }

    /// Waits for the quiet window.
    ///
    /// Returns `true` if `ticket` is still the latest one once the window elapsed, `false` as soon
    /// as it is cancelled by a newer operation.
    pub async fn debounce(&self, ticket: Ticket) -> bool {
        let (cancel, cancelled) = oneshot::channel();
        let replaced = self
            .pending
            .lock()
            .replace((ticket, cancel));
        if let Some((previous, previous_cancel)) = replaced {
            trace!(previous, ticket, "DebounceCancelled");
            let _ = previous_cancel.send(());
        }

        tokio::select! {
            _ = sleep(self.window) => {
                {
                    let mut pending = self.pending.lock();
                    if pending
                        .as_ref()
                        .is_some_and(|(t, _)| *t == ticket)
                    {
                        *pending = None;
                    }
                }
                self.is_current(ticket)
            }
            _ = cancelled => false,
        }
    }
}
