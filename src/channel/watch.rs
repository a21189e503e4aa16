use crate::channel::SecondaryContext;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Shortest polling interval; a zero interval is raised to this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Stops the watch when dropped
pub struct WatchGuard {
    task: JoinHandle<()>,
}

impl WatchGuard {
    pub fn stop(self) {}

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Poll `context` every `interval` and call `on_closed` once it is closed
///
/// Close events are not pushed reliably, so this polls. `on_closed` runs at
/// most once, and not at all if the guard is dropped first.
pub fn watch_secondary_context<F>(
    context: Arc<dyn SecondaryContext>,
    interval: Duration,
    on_closed: F,
) -> WatchGuard
where
    F: FnOnce() + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if context.is_closed() {
                debug!("Secondary context {} closed", context.id());
                on_closed();
                return;
            }
        }
    });
    WatchGuard { task }
}
