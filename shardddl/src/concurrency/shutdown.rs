//! Cooperative cancellation for coordination workers.
//!
//! A [`ShutdownTx`] fires once and every [`ShutdownRx`] subscribed to it observes the signal,
//! including receivers that subscribe after it fired. Dropping every transmitter also counts as
//! shutdown so that a forgotten handle never leaves a watch running forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(Arc<watch::Sender<bool>>);

impl ShutdownTx {
    /// Fires the shutdown signal. Calling it more than once has no further effect.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Creates a new receiver observing this signal.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }

    /// Returns `true` if the signal has already fired.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Fires the signal after `deadline` elapses.
    ///
    /// The returned handle can be aborted to cancel the deadline.
    pub fn shutdown_after(&self, deadline: Duration) -> JoinHandle<()> {
        let tx = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            debug!(?deadline, "shutdown deadline elapsed");
            tx.shutdown();
        })
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Waits until the signal fires or every transmitter is dropped.
    ///
    /// Returns immediately if the signal fired before the call.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }

    /// Returns `true` if the signal has already fired.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Creates a new shutdown channel in the not-fired state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(Arc::new(tx)), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_after_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        assert!(!rx.is_shutdown());

        tx.shutdown();

        rx.wait().await;
        assert!(rx.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_subscriber_observes_fired_signal() {
        let (tx, _rx) = create_shutdown_channel();
        tx.shutdown();

        let mut late = tx.subscribe();
        late.wait().await;
        assert!(late.is_shutdown());
    }

    #[tokio::test]
    async fn test_dropped_transmitter_releases_waiters() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), rx.wait())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_after_deadline() {
        let (tx, mut rx) = create_shutdown_channel();
        let _deadline = tx.shutdown_after(Duration::from_millis(100));

        rx.wait().await;
        assert!(tx.is_shutdown());
    }
}
