//! Background sweep of expired sessions.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::store::SessionStore;

/// Bound on how long shutdown waits for the task to observe cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Longest sweep interval honored; larger values are clamped to it.
const MAX_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Periodically calls [`SessionStore::cleanup`] until stopped.
///
/// Exactly one task runs per reaper. Dropping the reaper cancels the task.
pub(crate) struct Reaper {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Spawn the sweep task on the current Tokio runtime.
    pub(crate) fn spawn<S>(store: Arc<S>, interval: Duration, timeout: Duration) -> Self
    where
        S: SessionStore + ?Sized + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(store, interval, timeout, cancel.clone()));
        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the task to stop and wait for it to finish.
    ///
    /// A sweep in progress is abandoned. Safe to call more than once.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        let Some(mut handle) = handle else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => trace!("Session reaper stopped"),
            Ok(Err(e)) => warn!(error = %e, "Session reaper task failed"),
            Err(_) => {
                warn!("Session reaper did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run<S>(store: Arc<S>, interval: Duration, timeout: Duration, cancel: CancellationToken)
where
    S: SessionStore + ?Sized,
{
    let interval = interval.min(MAX_INTERVAL);
    let now = Instant::now();
    let first = now.checked_add(interval).unwrap_or(now);
    let mut ticker = tokio::time::interval_at(first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(timeout, store.cleanup()) => match result {
                Ok(Ok(removed)) => debug!(removed, "Expired session sweep finished"),
                Ok(Err(e)) => warn!(error = %e, "Expired session sweep failed"),
                Err(_) => warn!(?timeout, "Expired session sweep timed out"),
            },
        }
    }
}
