//! Copy-on-write listener collections.
//!
//! Mutation swaps in a fresh vector; fan-out iterates an immutable snapshot so a
//! listener registered or removed mid-iteration never affects the running pass.

use super::{read, write};
use std::sync::{Arc, RwLock};

pub(crate) struct ListenerList<T: ?Sized> {
    entries: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> Default for ListenerList<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: ?Sized> ListenerList<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, listener: Arc<T>) {
        let mut entries = write(&self.entries);
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(listener);
        *entries = Arc::new(next);
    }

    /// Removes the first entry pointing at the same allocation as `listener`.
    pub(crate) fn remove(&self, listener: &Arc<T>) -> bool {
        let mut entries = write(&self.entries);
        let Some(position) = entries
            .iter()
            .position(|entry| same_listener(entry, listener))
        else {
            return false;
        };

        let mut next = entries.as_ref().clone();
        next.remove(position);
        *entries = Arc::new(next);
        true
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        read(&self.entries).clone()
    }

    pub(crate) fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Compares data pointers only; vtable pointers of the same object may differ
// between codegen units.
fn same_listener<T: ?Sized>(left: &Arc<T>, right: &Arc<T>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(left) as *const (),
        Arc::as_ptr(right) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Listener(&'static str);

    impl Named for Listener {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn snapshot_is_not_affected_by_later_mutation() {
        let list: ListenerList<dyn Named> = ListenerList::new();
        let first: Arc<dyn Named> = Arc::new(Listener("first"));
        list.add(first.clone());

        let snapshot = list.snapshot();
        list.add(Arc::new(Listener("second")));
        assert!(list.remove(&first));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name(), "first");
        assert_eq!(list.len(), 1);
        assert_eq!(list.snapshot()[0].name(), "second");
    }

    #[test]
    fn remove_uses_pointer_identity() {
        let list: ListenerList<dyn Named> = ListenerList::new();
        let registered: Arc<dyn Named> = Arc::new(Listener("same-name"));
        let other: Arc<dyn Named> = Arc::new(Listener("same-name"));
        list.add(registered.clone());

        assert!(!list.remove(&other));
        assert!(list.remove(&registered));
        assert!(list.is_empty());
        assert!(!list.remove(&registered));
    }
}
