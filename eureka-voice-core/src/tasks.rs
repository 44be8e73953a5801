//! Cancellation primitives for per-session scheduled work.
//!
//! Every timer, tick loop, and I/O loop belonging to one session selects on a
//! single [`Cancellation`]. Teardown fires the paired [`CancelHandle`] once,
//! which makes "cancel everything this session ever scheduled" a single call
//! instead of a bookkeeping exercise. The handle also fires on drop, so a
//! session that panics or is abandoned cannot leak a running task.

use tokio::sync::watch;
use tokio::time::Duration;

/// Owning side of a cancellation pair. Fires on [`CancelHandle::cancel`] or
/// on drop, whichever comes first.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a linked handle/token pair.
    pub fn pair() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Cancellation { rx })
    }

    /// Signal every linked [`Cancellation`]. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Number of [`Cancellation`] tokens still listening on this handle.
    pub fn observers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

/// Cloneable token observed by scheduled tasks.
#[derive(Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the paired handle fires (or is dropped).
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        // changed() errs only when the sender is gone, which also means cancel.
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full delay elapsed, `false` on cancellation.
    pub async fn delay(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delay_completes_when_not_cancelled() {
        let (_handle, mut token) = CancelHandle::pair();
        assert!(token.delay(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_delay() {
        let (handle, mut token) = CancelHandle::pair();
        let waiter = tokio::spawn(async move { token.delay(Duration::from_secs(60)).await });
        handle.cancel();
        assert!(!waiter.await.expect("waiter panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let (handle, mut token) = CancelHandle::pair();
        drop(handle);
        assert!(!token.delay(Duration::from_secs(60)).await);
        assert!(token.is_cancelled());
    }

    #[test]
    fn observers_counts_live_tokens() {
        let (handle, token) = CancelHandle::pair();
        assert_eq!(handle.observers(), 1);
        let clone = token.clone();
        assert_eq!(handle.observers(), 2);
        drop(clone);
        drop(token);
        assert_eq!(handle.observers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_visible_to_every_clone() {
        let (handle, token) = CancelHandle::pair();
        let mut a = token.clone();
        let mut b = token;
        handle.cancel();
        a.cancelled().await;
        b.cancelled().await;
        assert!(a.is_cancelled() && b.is_cancelled());
    }
}
