//! Run-level cancellation
//!
//! Wraps the `watch` channel that `main` flips on SIGINT/SIGTERM. The
//! orchestrator derives a second signal from it when a run timeout is set.

use crate::domain::{Result, SluiceError};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
    _sender: Option<Arc<watch::Sender<bool>>>,
}

impl Cancellation {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx, _sender: None }
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _sender: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail with [`SluiceError::Cancelled`] when cancellation was requested
    pub fn check(&self, during: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(SluiceError::Cancelled(format!("run cancelled during {during}")))
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested
    ///
    /// Pending forever when every sender is gone without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_is_not_cancelled() {
        let cancel = Cancellation::never();
        assert!(!cancel.is_cancelled());
        assert!(cancel.check("test").is_ok());
        let waited = tokio::time::timeout(Duration::from_millis(20), cancel.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let (tx, rx) = watch::channel(false);
        let cancel = Cancellation::new(rx);
        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(cancel.check("staging"), Err(SluiceError::Cancelled(_))));
    }
}
