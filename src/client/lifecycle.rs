//! Cooperative shutdown for the supervisor task
//!
//! One-shot and irreversible: `close` flips the shutdown flag, joins the worker,
//! and caches the outcome so later calls return the same result immediately.

use crate::error::ClientError;
use std::future::Future;
use std::sync::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Resolve once shutdown has been requested or the controller is gone
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Owns the shutdown signal and the join handle of the supervised worker
pub(crate) struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    outcome: OnceCell<Option<String>>,
}

impl Lifecycle {
    /// Spawn the worker produced by `make_worker` on the current runtime
    pub fn spawn<W, Fut>(make_worker: W) -> Result<Self, ClientError>
    where
        W: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(make_worker(shutdown_rx));

        Ok(Self {
            shutdown_tx,
            worker: Mutex::new(Some(handle)),
            outcome: OnceCell::new(),
        })
    }

    /// A fresh receiver of the shutdown flag
    pub fn signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Signal shutdown, wait for the worker, and report its first fatal error
    pub async fn close(&self) -> Result<(), ClientError> {
        self.shutdown_tx.send_replace(true);

        let outcome = self
            .outcome
            .get_or_init(|| async {
                let handle = match self.worker.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(poisoned) => poisoned.into_inner().take(),
                };
                match handle {
                    Some(handle) => match handle.await {
                        Ok(()) => None,
                        Err(e) if e.is_cancelled() => {
                            warn!("client worker was cancelled before it finished");
                            None
                        }
                        Err(e) => {
                            error!(error = %e, "client worker terminated abnormally");
                            Some(e.to_string())
                        }
                    },
                    None => None,
                }
            })
            .await;

        match outcome {
            None => Ok(()),
            Some(reason) => Err(ClientError::Fatal(reason.clone())),
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        // The worker observes the flag and unwinds on its own
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_waits_for_worker() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let lifecycle = Lifecycle::spawn(move |mut shutdown| async move {
            stopped(&mut shutdown).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        assert!(!lifecycle.is_stopping());
        lifecycle.close().await.unwrap();
        assert!(lifecycle.is_stopping());
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let lifecycle = Lifecycle::spawn(|mut shutdown| async move {
            stopped(&mut shutdown).await;
        })
        .unwrap();

        assert!(lifecycle.close().await.is_ok());
        assert!(lifecycle.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_worker_panic_surfaces_as_fatal() {
        let lifecycle = Lifecycle::spawn(|_shutdown| async move {
            panic!("worker exploded");
        })
        .unwrap();

        let first = lifecycle.close().await;
        let second = lifecycle.close().await;
        assert!(matches!(first, Err(ClientError::Fatal(_))));
        match (first, second) {
            (Err(ClientError::Fatal(a)), Err(ClientError::Fatal(b))) => assert_eq!(a, b),
            other => panic!("expected two identical fatal results, got {other:?}"),
        }
    }

    #[test]
    fn test_spawn_without_runtime() {
        let result = Lifecycle::spawn(|_shutdown| async {});
        assert!(matches!(result, Err(ClientError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_stopped_resolves_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_millis(100), stopped(&mut rx))
            .await
            .expect("stopped should resolve once the sender is gone");
    }
}
