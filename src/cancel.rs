//! Run cancellation token.
//!
//! The control surface holds a [`CancelHandle`] (writable, cloneable) and hands the
//! sweep loop a [`CancelView`] (read-only). The flag is a `tokio::sync::watch`
//! channel, so setting it from a GUI thread, a Ctrl+C task or a test is lock-free
//! for the loop, which only polls it at iteration boundaries.

use std::sync::Arc;
use tokio::sync::watch;

/// Writable side of the cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Read-only side of the cancellation flag, polled by the sweep loop.
#[derive(Debug, Clone)]
pub struct CancelView {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Clear the flag. Called by the control surface at run start.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Request the active run to stop at its next iteration boundary.
    pub fn cancel(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("Stop requested");
        }
    }

    /// True once a stop has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// A read-only view for the sweep loop.
    pub fn view(&self) -> CancelView {
        CancelView {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelView {
    /// True once a stop has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is set. Returns immediately if it already is.
    pub async fn cancelled(&mut self) {
        // Err means every handle was dropped; nobody can cancel any more.
        if self.rx.wait_for(|set| *set).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_and_reset() {
        let handle = CancelHandle::new();
        let view = handle.view();
        assert!(!view.is_cancelled());

        handle.cancel();
        assert!(view.is_cancelled());
        assert!(handle.is_cancelled());

        handle.reset();
        assert!(!view.is_cancelled());
    }

    #[test]
    fn test_clones_share_flag() {
        let handle = CancelHandle::new();
        let other = handle.clone();
        let view = handle.view();
        other.cancel();
        assert!(view.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let handle = CancelHandle::new();
        let mut view = handle.view();
        let setter = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            setter.cancel();
        });
        tokio::time::timeout(Duration::from_secs(1), view.cancelled())
            .await
            .unwrap();
        assert!(view.is_cancelled());
    }
}
