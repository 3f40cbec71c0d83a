//! Ordered listener chains
//!
//! A [`Chain`] is a persistent value: `add` and `remove` return a new chain and
//! leave the receiver untouched. A chain holding one callback is represented
//! as that bare callback ([`Chain::Single`]), two or more as a shared slice
//! ([`Chain::Many`]), and none as [`Chain::Empty`]. Removing down to one
//! element collapses back to `Single`.
//!
//! Callbacks run in insertion order. A panicking callback is logged and does
//! not stop the ones after it.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// A shared listener
pub type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Wrap a closure as a [`Callback`]
pub fn callback<A, F>(f: F) -> Callback<A>
where
    F: Fn(&A) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Listener identity is the allocation, not the closure's vtable
pub fn same_callback<A>(a: &Callback<A>, b: &Callback<A>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Run `f`, logging instead of propagating a panic
pub fn isolate<F: FnOnce()>(label: &str, f: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("{} panicked: {}", label, reason);
    }
}

/// Persistent ordered list of callbacks
pub enum Chain<A> {
    Empty,
    Single(Callback<A>),
    Many(Arc<[Callback<A>]>),
}

impl<A> Chain<A> {
    pub fn new() -> Self {
        Chain::Empty
    }

    /// New chain with `cb` appended
    pub fn add(&self, cb: Callback<A>) -> Self {
        match self {
            Chain::Empty => Chain::Single(cb),
            Chain::Single(first) => Chain::Many(Arc::from(vec![first.clone(), cb])),
            Chain::Many(list) => {
                let mut next = list.to_vec();
                next.push(cb);
                Chain::Many(Arc::from(next))
            }
        }
    }

    /// New chain without the first occurrence of `cb`
    pub fn remove(&self, cb: &Callback<A>) -> Self {
        match self {
            Chain::Empty => Chain::Empty,
            Chain::Single(only) => {
                if same_callback(only, cb) {
                    Chain::Empty
                } else {
                    self.clone()
                }
            }
            Chain::Many(list) => {
                let Some(idx) = list.iter().position(|item| same_callback(item, cb)) else {
                    return self.clone();
                };
                let mut rest = list.to_vec();
                rest.remove(idx);
                Self::from_vec(rest)
            }
        }
    }

    fn from_vec(mut items: Vec<Callback<A>>) -> Self {
        match items.len() {
            0 => Chain::Empty,
            1 => Chain::Single(items.remove(0)),
            _ => Chain::Many(Arc::from(items)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Chain::Empty => 0,
            Chain::Single(_) => 1,
            Chain::Many(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Chain::Empty)
    }

    /// The bare callback, if the chain has collapsed to one element
    pub fn as_single(&self) -> Option<&Callback<A>> {
        match self {
            Chain::Single(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Callback<A>> {
        let slice: &[Callback<A>] = match self {
            Chain::Empty => &[],
            Chain::Single(cb) => std::slice::from_ref(cb),
            Chain::Many(list) => list,
        };
        slice.iter()
    }

    pub fn contains(&self, cb: &Callback<A>) -> bool {
        self.iter().any(|item| same_callback(item, cb))
    }

    /// Invoke every callback in order
    pub fn call(&self, arg: &A) {
        for cb in self.iter() {
            isolate("listener", || cb(arg));
        }
    }
}

impl<A> Clone for Chain<A> {
    fn clone(&self) -> Self {
        match self {
            Chain::Empty => Chain::Empty,
            Chain::Single(cb) => Chain::Single(cb.clone()),
            Chain::Many(list) => Chain::Many(list.clone()),
        }
    }
}

impl<A> Default for Chain<A> {
    fn default() -> Self {
        Chain::Empty
    }
}

impl<A> fmt::Debug for Chain<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Empty => write!(f, "Chain::Empty"),
            Chain::Single(_) => write!(f, "Chain::Single"),
            Chain::Many(list) => write!(f, "Chain::Many({})", list.len()),
        }
    }
}

impl<A> FromIterator<Callback<A>> for Chain<A> {
    fn from_iter<I: IntoIterator<Item = Callback<A>>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, [Callback<i32>; 3]) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let cbs = [
            callback(move |x: &i32| a.lock().push(x + 1)),
            callback(move |x: &i32| b.lock().push(x - 5)),
            callback(move |x: &i32| c.lock().push(x * 5)),
        ];
        (log, cbs)
    }

    #[test]
    fn test_add_to_empty_is_single() {
        let (_, [f, _, _]) = recorder();
        let chain = Chain::new().add(f.clone());
        assert!(same_callback(chain.as_single().unwrap(), &f));
    }

    #[test]
    fn test_add_to_single_is_many() {
        let (_, [f, g, _]) = recorder();
        let chain = Chain::new().add(f.clone()).add(g.clone());
        assert!(matches!(chain, Chain::Many(_)));
        let items: Vec<_> = chain.iter().collect();
        assert!(same_callback(items[0], &f));
        assert!(same_callback(items[1], &g));
    }

    #[test]
    fn test_remove_collapses() {
        let (_, [f, g, h]) = recorder();
        let chain: Chain<i32> = [f.clone(), g.clone(), h.clone()].into_iter().collect();

        let two = chain.remove(&f);
        assert_eq!(two.len(), 2);
        let one = two.remove(&h);
        assert!(same_callback(one.as_single().unwrap(), &g));
        assert!(one.remove(&g).is_empty());
    }

    #[test]
    fn test_chains_are_values() {
        let (log, [f, g, _]) = recorder();
        let single = Chain::new().add(f.clone());
        let pair = single.add(g.clone());

        single.call(&1);
        assert_eq!(*log.lock(), vec![2]);
        assert_eq!(single.len(), 1);

        let back = pair.remove(&g);
        assert_eq!(pair.len(), 2);
        assert!(back.as_single().is_some());
    }

    #[test]
    fn test_call_order() {
        let (log, [f, g, h]) = recorder();
        let chain = Chain::new().add(f).add(g).add(h);
        chain.call(&5);
        assert_eq!(*log.lock(), vec![6, 0, 25]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let (log, [f, _, h]) = recorder();
        let boom: Callback<i32> = callback(|_: &i32| panic!("listener failure"));
        let chain = Chain::new().add(f).add(boom).add(h);
        chain.call(&2);
        assert_eq!(*log.lock(), vec![3, 10]);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let (_, [f, g, _]) = recorder();
        let chain = Chain::new().add(f);
        let same = chain.remove(&g);
        assert_eq!(same.len(), 1);
        assert!(Chain::<i32>::Empty.remove(&g).is_empty());
    }
}
