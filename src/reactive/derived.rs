//! Derived - Lazy, memoized computed value.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::graph::{with_observer, Observer, SourceSet, SubscriberSet};

struct DerivedInner<T> {
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    subscribers: SubscriberSet,
    sources: Rc<SourceSet>,
    self_weak: Weak<DerivedInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Observer for DerivedInner<T> {
    fn invalidate(&self) {
        // Already-dirty nodes have forwarded the invalidation before.
        if !self.dirty.get() {
            self.dirty.set(true);
            self.subscribers.notify();
        }
    }
}

/// A readable computed value.
///
/// Recomputes lazily on `get`, and only when a dependency recorded during
/// the previous computation has changed. Reading a derived inside another
/// tracked computation registers a dependency on it, so deriveds compose.
pub struct Derived<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("dirty", &self.inner.dirty.get())
            .finish_non_exhaustive()
    }
}

/// Create a derived from a pure computation.
pub fn derived<T: Clone + PartialEq + 'static>(compute: impl Fn() -> T + 'static) -> Derived<T> {
    Derived {
        inner: Rc::new_cyclic(|weak| DerivedInner {
            compute: Box::new(compute),
            value: RefCell::new(None),
            dirty: Cell::new(true),
            subscribers: SubscriberSet::new(),
            sources: SourceSet::new(),
            self_weak: weak.clone(),
        }),
    }
}

impl<T: Clone + PartialEq + 'static> Derived<T> {
    /// Read the value, registering a dependency and recomputing if stale.
    pub fn get(&self) -> T {
        self.inner.subscribers.track();
        self.read()
    }

    /// Read the value without registering a dependency on this derived.
    /// The computation itself still tracks its own dependencies.
    pub fn peek(&self) -> T {
        self.read()
    }

    fn read(&self) -> T {
        let stale = self.inner.dirty.get() || self.inner.value.borrow().is_none();
        if stale {
            let observer: Weak<dyn Observer> = self.inner.self_weak.clone();
            let value = with_observer(observer, &self.inner.sources, || (self.inner.compute)());
            self.inner.dirty.set(false);
            *self.inner.value.borrow_mut() = Some(value.clone());
            return value;
        }
        self.inner
            .value
            .borrow()
            .clone()
            .unwrap_or_else(|| (self.inner.compute)())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::signal;
    use std::cell::Cell;

    #[test]
    fn test_memoization() {
        let a = signal(1u32);
        let computations = Rc::new(Cell::new(0));

        let d = {
            let a = a.clone();
            let computations = computations.clone();
            derived(move || {
                computations.set(computations.get() + 1);
                a.get() * 10
            })
        };

        assert_eq!(d.get(), 10);
        assert_eq!(d.get(), 10);
        assert_eq!(computations.get(), 1); // second get served from cache

        a.set(2);
        assert_eq!(d.get(), 20);
        assert_eq!(computations.get(), 2);
    }

    #[test]
    fn test_unrelated_change_does_not_recompute() {
        let watched = signal(1u32);
        let unrelated = signal(100u32);
        let computations = Rc::new(Cell::new(0));

        let d = {
            let watched = watched.clone();
            let computations = computations.clone();
            derived(move || {
                computations.set(computations.get() + 1);
                watched.get()
            })
        };

        d.get();
        unrelated.set(101);
        d.get();
        assert_eq!(computations.get(), 1);

        watched.set(2);
        d.get();
        assert_eq!(computations.get(), 2);
    }

    #[test]
    fn test_conditional_dependency_dropped_after_switch() {
        let use_a = signal(true);
        let a = signal(1u32);
        let b = signal(10u32);
        let computations = Rc::new(Cell::new(0));

        let d = {
            let (use_a, a, b) = (use_a.clone(), a.clone(), b.clone());
            let computations = computations.clone();
            derived(move || {
                computations.set(computations.get() + 1);
                if use_a.get() { a.get() } else { b.get() }
            })
        };

        assert_eq!(d.get(), 1);
        use_a.set(false);
        assert_eq!(d.get(), 10);
        assert_eq!(computations.get(), 2);

        // `a` is no longer read; writing it must not dirty the derived.
        a.set(2);
        assert_eq!(d.get(), 10);
        assert_eq!(computations.get(), 2);

        b.set(20);
        assert_eq!(d.get(), 20);
        assert_eq!(computations.get(), 3);
    }

    #[test]
    fn test_peek_registers_no_dependency() {
        use crate::reactive::effect;

        let base = signal(1u32);
        let doubled = {
            let base = base.clone();
            derived(move || base.get() * 2)
        };
        let runs = Rc::new(Cell::new(0));

        let doubled_clone = doubled.clone();
        let runs_clone = runs.clone();
        let _stop = effect(move || {
            doubled_clone.peek();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        base.set(5);
        // peek registered no edge from the effect to the derived.
        assert_eq!(runs.get(), 1);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn test_deriveds_compose() {
        let base = signal(2u32);
        let doubled = {
            let base = base.clone();
            derived(move || base.get() * 2)
        };
        let quadrupled = {
            let doubled = doubled.clone();
            derived(move || doubled.get() * 2)
        };

        assert_eq!(quadrupled.get(), 8);
        base.set(3);
        assert_eq!(quadrupled.get(), 12);
    }

    #[test]
    fn test_diamond_dependency_consistent() {
        let base = signal(1u32);
        let left = {
            let base = base.clone();
            derived(move || base.get() + 1)
        };
        let right = {
            let base = base.clone();
            derived(move || base.get() * 10)
        };
        let join = {
            let left = left.clone();
            let right = right.clone();
            derived(move || (left.get(), right.get()))
        };

        assert_eq!(join.get(), (2, 10));
        base.set(5);
        // Both branches observe the same write; no partial state visible.
        assert_eq!(join.get(), (6, 50));
    }
}
