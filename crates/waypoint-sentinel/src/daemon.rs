//! Background loop shared by the periodic monitors
//!
//! A [`Daemon`] ticks a `tokio::time::interval` and runs one sweep per tick
//! until it is stopped. The first sweep runs immediately.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub(crate) struct Daemon {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Daemon {
    /// Spawn onto the current runtime. Panics outside a tokio runtime, like
    /// `tokio::spawn`.
    pub(crate) fn spawn<F, Fut>(name: &'static str, period: Duration, mut sweep: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => sweep().await,
                    _ = stop_rx.changed() => break,
                }
            }
            debug!(daemon = name, "Daemon loop exited");
        });

        Self {
            name,
            shutdown,
            handle,
        }
    }

    /// Signal the loop to exit after the sweep in progress, if any
    pub(crate) fn stop(self) {
        debug!(daemon = self.name, "Stopping daemon");
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let sweeps = Arc::new(AtomicUsize::new(0));
        let counter = sweeps.clone();
        let daemon = Daemon::spawn("test", Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(sweeps.load(Ordering::SeqCst), 3);

        daemon.stop();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sweeps.load(Ordering::SeqCst), 3);
    }
}
