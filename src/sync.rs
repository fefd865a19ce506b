use core::{future::poll_fn, task::Poll};

use portable_atomic::{AtomicUsize, Ordering};

use atomic_waker::AtomicWaker;

use crate::notify::SoftwareInterrupt;

/// A software interrupt for executors, which drain the notification queue from a task.
///
/// Every [pend](SoftwareInterrupt::pend) is counted, so that no wakeup is lost between the
/// consumer draining the queue and going back to sleep.
pub struct SwiSignal {
    waker: AtomicWaker,
    pending: AtomicUsize,
}
impl SwiSignal {
    pub const fn new() -> Self {
        Self {
            waker: AtomicWaker::new(),
            pending: AtomicUsize::new(0),
        }
    }
    /// Check if the signal was pended since the last [wait](Self::wait) completed.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Relaxed) != 0
    }
    /// Forget all pending signals.
    pub fn reset(&self) {
        self.pending.store(0, Ordering::Relaxed);
    }
    /// Asynchronously wait for the signal to be pended.
    ///
    /// All signals pended so far are consumed at once, since one drain of the queue handles
    /// them all.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            if self.pending.swap(0, Ordering::Acquire) == 0 {
                self.waker.register(cx.waker());
                // A pend may have come in before the waker was registered.
                if self.pending.swap(0, Ordering::Acquire) == 0 {
                    return Poll::Pending;
                }
            }
            Poll::Ready(())
        })
        .await
    }
}
impl Default for SwiSignal {
    fn default() -> Self {
        Self::new()
    }
}
impl SoftwareInterrupt for SwiSignal {
    fn pend(&self) {
        self.pending.fetch_add(1, Ordering::Release);
        self.waker.wake();
    }
}
