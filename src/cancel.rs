use tokio::sync::watch;

/// Cancellation flag for a running capture or upload task.
///
/// Cloneable; cancelling is sticky and idempotent.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a cancellation handle and the receiver the worker observes.
pub fn cancellation() -> (CancelHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, rx)
}

/// Resolve once the flag flips to `true`. Never resolves if the handle is
/// dropped without cancelling, so callers can race it in `select!` arms.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }

    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }

    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let (handle, mut rx) = cancellation();

        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::timeout(Duration::from_millis(100), cancelled(&mut rx))
            .await
            .expect("cancelled() should resolve");
    }

    #[tokio::test]
    async fn cancelled_pends_while_flag_is_clear() {
        let (_handle, mut rx) = cancellation();

        let waited = tokio::time::timeout(Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(waited.is_err(), "should still be pending");
    }
}
