//! Poll scheduler — a cancellable fixed-interval task.
//!
//! The scheduler only knows how to run a tick callback on a cadence. Whether
//! it should be armed at all is decided by the controller after every state or
//! visibility change; arming an armed scheduler and disarming a disarmed one
//! are both no-ops.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Armed {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns at most one running poll task.
#[derive(Default)]
pub struct PollScheduler {
    slot: Mutex<Option<Armed>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `period`, first tick one full period from now.
    ///
    /// Returns `false` if a task was already armed. Ticks run sequentially:
    /// a slow tick delays the next one and missed ticks are skipped.
    /// Must be called within a Tokio runtime.
    pub fn arm<F, Fut>(&self, period: Duration, on_tick: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|armed| !armed.token.is_cancelled()) {
            return false;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = tick.tick() => {}
                }
                on_tick().await;
            }
        });

        debug!(period_ms = period.as_millis() as u64, "Poll scheduler armed");
        *slot = Some(Armed { token, handle });
        true
    }

    /// Stop ticking. A tick already running is allowed to finish.
    pub fn disarm(&self) -> bool {
        let mut slot = self.lock();
        match slot.take() {
            Some(armed) if !armed.token.is_cancelled() => {
                armed.token.cancel();
                debug!("Poll scheduler disarmed");
                true
            }
            _ => false,
        }
    }

    /// Cancel and abort the task, including any tick in progress.
    pub fn shutdown(&self) {
        if let Some(armed) = self.lock().take() {
            armed.token.cancel();
            armed.handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|armed| !armed.token.is_cancelled())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Armed>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
