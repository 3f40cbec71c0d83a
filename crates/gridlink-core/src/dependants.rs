//! Notification bus
//!
//! Any hashable subject can be watched by any number of observers. `notify`
//! delivers to a snapshot of the observers registered at call time, so an
//! observer that adds or removes watchers while being notified only affects
//! later rounds.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::chain::isolate;

/// Receives notifications for the subjects it watches
pub trait Observer<S, M>: Send + Sync {
    fn update(&self, subject: &S, message: &M);
}

impl<S, M, F> Observer<S, M> for F
where
    F: Fn(&S, &M) + Send + Sync,
{
    fn update(&self, subject: &S, message: &M) {
        self(subject, message)
    }
}

/// Shared observer handle; identity is the allocation
pub type ObserverRef<S, M> = Arc<dyn Observer<S, M>>;

/// Observers keyed by subject
pub struct Dependants<S, M>
where
    S: Eq + Hash,
{
    observers: DashMap<S, Vec<ObserverRef<S, M>>>,
}

impl<S, M> Dependants<S, M>
where
    S: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            observers: DashMap::new(),
        }
    }

    /// Watch `subject`. Adding the same observer twice has no effect.
    pub fn add(&self, subject: S, observer: ObserverRef<S, M>) {
        let mut list = self.observers.entry(subject).or_default();
        if !list.iter().any(|o| same_observer(o, &observer)) {
            list.push(observer);
        }
    }

    /// Stop watching `subject`
    pub fn remove(&self, subject: &S, observer: &ObserverRef<S, M>) {
        let now_empty = match self.observers.get_mut(subject) {
            Some(mut list) => {
                list.retain(|o| !same_observer(o, observer));
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.observers.remove_if(subject, |_, list| list.is_empty());
        }
    }

    /// Drop every observer of `subject`
    pub fn release(&self, subject: &S) {
        self.observers.remove(subject);
    }

    /// Drop every observer of every subject
    pub fn clear(&self) {
        self.observers.clear();
    }

    pub fn observers(&self, subject: &S) -> Vec<ObserverRef<S, M>> {
        self.observers
            .get(subject)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    pub fn has_observers(&self, subject: &S) -> bool {
        self.observers.contains_key(subject)
    }

    /// Deliver `message` to every current observer of `subject`
    pub fn notify(&self, subject: &S, message: &M) {
        // Snapshot before calling out; observers may re-enter the map.
        for observer in self.observers(subject) {
            isolate("observer", || observer.update(subject, message));
        }
    }
}

impl<S, M> Default for Dependants<S, M>
where
    S: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

fn same_observer<S, M>(a: &ObserverRef<S, M>, b: &ObserverRef<S, M>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<(&'static str, String)>>>;

    fn watcher(log: &Log, name: &'static str) -> ObserverRef<&'static str, String> {
        let log = log.clone();
        Arc::new(move |_subject: &&'static str, message: &String| {
            log.lock().push((name, message.clone()));
        })
    }

    #[test]
    fn test_notify_reaches_subject_observers_only() {
        let bus: Dependants<&'static str, String> = Dependants::new();
        let log: Log = Arc::default();
        bus.add("grid", watcher(&log, "a"));
        bus.add("arc", watcher(&log, "b"));

        bus.notify(&"grid", &"attached".to_string());
        assert_eq!(*log.lock(), vec![("a", "attached".to_string())]);
    }

    #[test]
    fn test_remove_and_release() {
        let bus: Dependants<&'static str, String> = Dependants::new();
        let log: Log = Arc::default();
        let a = watcher(&log, "a");
        let b = watcher(&log, "b");
        bus.add("grid", a.clone());
        bus.add("grid", a.clone());
        bus.add("grid", b.clone());
        assert_eq!(bus.observers(&"grid").len(), 2);

        bus.remove(&"grid", &a);
        bus.notify(&"grid", &"x".to_string());
        assert_eq!(*log.lock(), vec![("b", "x".to_string())]);

        bus.remove(&"grid", &b);
        assert!(!bus.has_observers(&"grid"));

        bus.add("grid", a);
        bus.release(&"grid");
        assert!(bus.observers(&"grid").is_empty());
    }

    #[test]
    fn test_notify_uses_snapshot() {
        let bus: Arc<Dependants<&'static str, String>> = Arc::new(Dependants::new());
        let log: Log = Arc::default();
        let late = watcher(&log, "late");

        let bus_ref = bus.clone();
        let late_ref = late.clone();
        let joiner: ObserverRef<&'static str, String> =
            Arc::new(move |subject: &&'static str, _: &String| {
                bus_ref.add(*subject, late_ref.clone());
            });
        bus.add("grid", joiner);

        bus.notify(&"grid", &"first".to_string());
        assert!(log.lock().is_empty());

        bus.notify(&"grid", &"second".to_string());
        assert_eq!(*log.lock(), vec![("late", "second".to_string())]);
    }

    #[test]
    fn test_failing_observer_does_not_stop_delivery() {
        let bus: Dependants<&'static str, String> = Dependants::new();
        let log: Log = Arc::default();
        bus.add(
            "grid",
            Arc::new(|_: &&'static str, _: &String| panic!("observer failure")),
        );
        bus.add("grid", watcher(&log, "after"));

        bus.notify(&"grid", &"x".to_string());
        assert_eq!(log.lock().len(), 1);
    }
}
