//! Session-wide shutdown signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Trigger side of a shutdown signal.
///
/// Cloning shares the same signal; triggering is idempotent.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create an untriggered signal
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver for this signal
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observing side of a shutdown signal.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether the signal has fired
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the signal.
    ///
    /// If every [`Shutdown`] handle is dropped without firing, this never
    /// resolves.
    pub async fn recv(&mut self) {
        loop {
            let fired = *self.rx.borrow_and_update();
            if fired {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless the signal fires first.
    ///
    /// Returns `true` if the full duration elapsed, `false` on shutdown.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.recv() => false,
            () = tokio::time::sleep(duration) => !self.is_triggered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move { signal.recv().await });
        shutdown.trigger();

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_signal_after_trigger_is_ready() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();

        let mut late = shutdown.signal();
        assert!(late.is_triggered());
        timeout(Duration::from_millis(100), late.recv())
            .await
            .expect("late subscriber should see the trigger");
    }

    #[tokio::test]
    async fn test_sleep_interrupted() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let completed = timeout(Duration::from_secs(2), signal.sleep(Duration::from_secs(60)))
            .await
            .expect("sleep not interrupted");
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_sleep_completes() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        assert!(signal.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_dropped_trigger_never_fires() {
        let mut signal = Shutdown::new().signal();
        let result = timeout(Duration::from_millis(50), signal.recv()).await;
        assert!(result.is_err());
    }
}
