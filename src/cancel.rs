//! Cooperative cancellation for a single apply.
//!
//! A [`CancelHandle`] is held by whoever owns the apply (the CLI installs a
//! Ctrl-C listener); every interested task holds a cloned [`CancelSignal`].
//! Cancellation is sticky: once fired, every signal observes it forever.

use tokio::sync::watch;

/// Owner side of a cancellation channel.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

/// Observer side of a cancellation channel.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

/// Creates a connected handle and signal pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelSignal { receiver })
}

impl CancelHandle {
    /// Fires the cancellation signal. Repeated calls are harmless.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns another signal observing this handle.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

impl CancelSignal {
    /// Returns a signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, the future stays pending.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let outcome = receiver.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if outcome.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn signal_observes_cancel() {
        let (handle, signal) = cancel_pair();
        assert!(!signal.is_cancelled());

        handle.cancel();

        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("cancelled should resolve after cancel");
    }

    #[tokio::test]
    async fn subscribed_signal_sees_earlier_cancel() {
        let (handle, _signal) = cancel_pair();
        handle.cancel();

        assert!(handle.signal().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_stays_pending() {
        let signal = CancelSignal::never();

        let waited = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;

        assert!(waited.is_err(), "never() must not resolve");
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_does_not_cancel() {
        let (handle, signal) = cancel_pair();
        drop(handle);

        let waited = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;

        assert!(waited.is_err());
    }
}
