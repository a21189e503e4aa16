//! One-shot session timers
//!
//! Each session owns two independent timers: the total-flow deadline and the
//! profile-enrichment grace period. A timer fires at most once; disarming a
//! timer that already fired is a no-op.

use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Total-flow deadline
    Flow,
    /// Profile-enrichment grace period
    Enrichment,
}

type TimerKey = (Uuid, TimerKind);

struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct TimeoutSupervisor {
    timers: Arc<Mutex<HashMap<TimerKey, ArmedTimer>>>,
    generations: Arc<AtomicU64>,
}

fn lock(
    timers: &Mutex<HashMap<TimerKey, ArmedTimer>>,
) -> MutexGuard<'_, HashMap<TimerKey, ArmedTimer>> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TimeoutSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_expire` to run once after `duration`
    ///
    /// Re-arming the same timer replaces the pending one. Must be called from
    /// within a Tokio runtime.
    pub fn arm<F>(&self, session_id: Uuid, kind: TimerKind, duration: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let key = (session_id, kind);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        // Held until the entry is inserted so an immediate expiry still finds it
        let mut armed = lock(&self.timers);
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let owns_timer = {
                let mut timers = lock(&timers);
                match timers.get(&key) {
                    Some(current) if current.generation == generation => {
                        timers.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if owns_timer {
                debug!("{kind:?} timer expired for session {session_id}");
                on_expire();
            }
        });

        if let Some(previous) = armed.insert(key, ArmedTimer { generation, task }) {
            previous.task.abort();
        }
    }

    /// Cancel a pending timer, returning whether one was pending
    pub fn disarm(&self, session_id: Uuid, kind: TimerKind) -> bool {
        match lock(&self.timers).remove(&(session_id, kind)) {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn disarm_all(&self, session_id: Uuid) {
        self.disarm(session_id, TimerKind::Flow);
        self.disarm(session_id, TimerKind::Enrichment);
    }

    #[must_use]
    pub fn is_armed(&self, session_id: Uuid, kind: TimerKind) -> bool {
        lock(&self.timers).contains_key(&(session_id, kind))
    }
}
