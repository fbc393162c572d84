use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot termination signal shared between a component and the tasks it
/// spawned. Once triggered it stays terminated; `wait` futures created
/// before or after the trigger all resolve.
pub struct Shutdown {
    terminated: AtomicBool,
    notify: Notify,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            terminated: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Trigger the signal and wake all waiters.
    pub fn shutdown(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Resolves when the signal is triggered. Usable inside
    /// `tokio::select!` loops; a fresh call observes an already-triggered
    /// signal immediately.
    pub async fn wait(&self) {
        while !self.terminated.load(Ordering::SeqCst) {
            let notified = self.notify.notified();
            if self.terminated.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_after_shutdown() {
        let shutdown = Arc::new(Shutdown::new());
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        });
        shutdown.shutdown();
        waiter.await.unwrap();
        assert!(shutdown.is_terminated());
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_resolves_immediately() {
        let shutdown = Arc::new(Shutdown::new());
        shutdown.shutdown();
        shutdown.wait().await;
    }
}
