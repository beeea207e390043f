//! Session stop signal shared by the writer and reader loops.

use std::sync::Arc;

use tokio::sync::watch;

/// One-way "stop" flag. Once triggered it stays triggered.
#[derive(Clone, Debug)]
pub(crate) struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask both loops to stop.
    pub(crate) fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once the signal is triggered.
    pub(crate) async fn stopped(rx: &mut watch::Receiver<bool>) {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let stop = StopSignal::new();
        let mut rx = stop.subscribe();
        assert!(!stop.is_triggered());

        let waiter = tokio::spawn(async move { StopSignal::stopped(&mut rx).await });
        stop.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stop.is_triggered());
    }

    #[tokio::test]
    async fn test_subscribe_after_trigger_resolves_immediately() {
        let stop = StopSignal::new();
        stop.trigger();
        let mut rx = stop.subscribe();
        StopSignal::stopped(&mut rx).await;
    }
}
