//! Cancellation and bounded joins for long-running loops
//!
//! Every loop owns a [`StopListener`] cloned from one [`StopSignal`]. The
//! signal is a `watch` channel so triggering twice is harmless and late
//! subscribers still observe the stopped state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{CoreError, Result};

/// Owner side of a stop signal
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every listener. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side handed to each loop
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires (immediately if it already has).
    ///
    /// A dropped [`StopSignal`] counts as stopped.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` unless stopped first. Returns `true` when the
    /// sleep was cut short by the signal.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stopped() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

/// Wait for a task to finish, aborting it when the grace period runs out.
pub async fn join_with_timeout(
    name: &str,
    handle: JoinHandle<()>,
    grace: Duration,
) -> Result<()> {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => {
            debug!(task = name, "Task stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(task = name, error = %e, "Task ended abnormally");
            Ok(())
        }
        Err(_) => {
            abort.abort();
            error!(
                task = name,
                grace_ms = grace.as_millis() as u64,
                "Task did not stop in time, aborted"
            );
            Err(CoreError::ShutdownTimeout {
                task: name.to_string(),
                duration_ms: grace.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_idempotent() {
        let signal = StopSignal::new();
        let mut listener = signal.subscribe();
        assert!(!listener.is_stopped());

        signal.trigger();
        signal.trigger();

        listener.stopped().await;
        assert!(listener.is_stopped());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_stop() {
        let signal = StopSignal::new();
        signal.trigger();
        let mut late = signal.subscribe();
        tokio::time::timeout(Duration::from_millis(100), late.stopped())
            .await
            .expect("late subscriber should observe stop");
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_stop() {
        let signal = StopSignal::new();
        let mut listener = signal.subscribe();
        let waiter = tokio::spawn(async move { listener.sleep(Duration::from_secs(30)).await });
        signal.trigger();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_join_with_timeout_finished_task() {
        let handle = tokio::spawn(async {});
        assert!(join_with_timeout("quick", handle, Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_join_with_timeout_aborts_stuck_task() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let err = join_with_timeout("stuck", handle, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SHUTDOWN_TIMEOUT");
    }
}
