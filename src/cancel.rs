//! Shared cancellation handle and deadline guard for external calls.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable run-wide cancellation flag.
///
/// Cancelling is sticky: once set, every clone observes it and every
/// [`guarded`] call returns [`Error::Cancelled`].
#[derive(Clone, Debug)]
pub struct Cancel {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Cancel {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancel {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Cancel {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // sender lives as long as any clone, so this never completes
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run `fut` unless the run is cancelled or `deadline` elapses first.
///
/// # Arguments
/// * `cancel` - Run-wide cancellation handle
/// * `deadline` - Upper bound for this call
/// * `operation` - Short label used in the timeout error
pub async fn guarded<F, T>(cancel: &Cancel, deadline: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = tokio::time::timeout(deadline, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                seconds: deadline.as_secs(),
            }),
        },
    }
}
