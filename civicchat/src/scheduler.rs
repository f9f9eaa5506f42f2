//! Keyed, cancelable, re-armable timers on the tokio runtime.
//!
//! Every delayed action in the client (seen-marking debounce, typing idle,
//! remote typing expiry) goes through a [`Scheduler`] owned by the component
//! that needs it. Arming a key that is already armed replaces the previous
//! timer, which is how debounce windows are reset.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// A set of named one-shot timers.
#[derive(Debug)]
pub struct Scheduler<K> {
    timers: Mutex<HashMap<K, JoinHandle<()>>>,
}

impl<K> Scheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `task` after `delay`, replacing any timer already armed under `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, key: K, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        let mut timers = self.timers.lock();
        timers.retain(|_, h| !h.is_finished());
        if let Some(previous) = timers.insert(key, handle) {
            previous.abort();
        }
    }

    /// Cancels the timer under `key`. Returns `true` if one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        self.timers.lock().remove(key).is_some_and(|handle| {
            let pending = !handle.is_finished();
            handle.abort();
            pending
        })
    }

    /// Cancels every pending timer.
    pub fn cancel_all(&self) {
        for (_, handle) in self.timers.lock().drain() {
            handle.abort();
        }
    }

    /// Returns `true` while a timer under `key` has not yet fired.
    #[must_use]
    pub fn is_armed(&self, key: &K) -> bool {
        self.timers
            .lock()
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<K> Default for Scheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for Scheduler<K> {
    fn drop(&mut self) {
        for (_, handle) in self.timers.get_mut().drain() {
            handle.abort();
        }
    }
}
