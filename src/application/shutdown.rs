//! # Shutdown Signal
//!
//! Cooperative cancellation for the engine. Idle waits race against the signal;
//! an in-flight send is never interrupted.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Returns the trigger side and the listener side.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`, waking early on shutdown. Returns `true` if shutdown was requested.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = sleep(duration) => false,
            _ = Self::triggered(&mut rx) => true,
        }
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        Self::triggered(&mut rx).await;
    }

    async fn triggered(rx: &mut watch::Receiver<bool>) {
        // A dropped sender means nobody can ask us to stop; wait forever.
        let closed = rx.wait_for(|stop| *stop).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
