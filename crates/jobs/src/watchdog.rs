//! Resettable inactivity timer bound to one job.
//!
//! The watchdog runs as a background task that sleeps until a deadline.
//! Every inbound record pushes the deadline forward via [`Watchdog::reset`];
//! if the deadline passes first the timeout callback runs exactly once and
//! the watchdog disarms itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct Watchdog {
    bound: Duration,
    deadline: watch::Sender<Instant>,
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    /// Start the timer. `on_timeout` runs on the watchdog task if no
    /// [`reset`](Self::reset) arrives within `bound`.
    pub fn arm<F>(bound: Duration, on_timeout: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (deadline, mut deadline_rx) = watch::channel(Instant::now() + bound);
        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let task_cancel = cancel.clone();
        let task_fired = Arc::clone(&fired);
        let mut on_timeout = Some(on_timeout);

        tokio::spawn(async move {
            loop {
                let current = *deadline_rx.borrow_and_update();
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => return,
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep_until(current) => {
                        task_fired.store(true, Ordering::SeqCst);
                        task_cancel.cancel();
                        if let Some(callback) = on_timeout.take() {
                            callback();
                        }
                        return;
                    }
                }
            }
        });

        Self {
            bound,
            deadline,
            cancel,
            fired,
        }
    }

    /// Push the deadline to `now + bound`. No effect once fired or disarmed.
    pub fn reset(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.deadline.send_replace(Instant::now() + self.bound);
    }

    /// Stop the timer without firing. Idempotent.
    pub fn disarm(&self) {
        self.cancel.cancel();
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
