use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Notified when the number of busy keys leaves or returns to zero.
///
/// Callbacks run while the tracker lock is held, so a `begin` racing an
/// `end` on another key can never deliver `on_idle` after `on_busy`.
/// Implementations must not call back into the tracker.
pub trait InFlightObserver: Send + Sync {
    fn on_busy(&self);
    fn on_idle(&self);
}

/// Set of keys with an outstanding request. A key is either idle or busy;
/// a second `begin` on a busy key is refused rather than queued.
#[derive(Default)]
pub struct InFlightTracker {
    busy: Mutex<BTreeSet<String>>,
    observers: Vec<Arc<dyn InFlightObserver>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn InFlightObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self, key: &str) -> bool {
        let mut busy = self.lock();
        if busy.contains(key) {
            return false;
        }
        busy.insert(key.to_string());
        if busy.len() == 1 {
            for observer in &self.observers {
                observer.on_busy();
            }
        }
        true
    }

    pub fn end(&self, key: &str) {
        let mut busy = self.lock();
        if busy.remove(key) && busy.is_empty() {
            for observer in &self.observers {
                observer.on_idle();
            }
        }
    }

    /// Scoped form of `begin`: the key is released when the guard drops,
    /// including during unwinding.
    pub fn try_acquire(&self, key: &str) -> Option<InFlightGuard<'_>> {
        self.begin(key).then(|| InFlightGuard {
            tracker: self,
            key: key.to_string(),
        })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn busy_keys(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

impl fmt::Debug for InFlightTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightTracker")
            .field("busy", &self.busy_keys())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[must_use = "the key is released as soon as the guard is dropped"]
pub struct InFlightGuard<'a> {
    tracker: &'a InFlightTracker,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.tracker.end(&self.key);
    }
}
