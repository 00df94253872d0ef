//! Signal - Independently settable reactive cell.

use std::cell::RefCell;
use std::rc::Rc;

use super::graph::{untracked, SubscriberSet};

struct SignalInner<T> {
    value: RefCell<T>,
    subscribers: SubscriberSet,
}

/// A writable reactive cell.
///
/// `get` records a dependency edge when read inside a derived or an effect;
/// `set` notifies dependents only when the value actually changed
/// (`PartialEq`). Cloning the handle shares the cell.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Create a signal holding `value`.
pub fn signal<T: Clone + PartialEq + 'static>(value: T) -> Signal<T> {
    Signal {
        inner: Rc::new(SignalInner {
            value: RefCell::new(value),
            subscribers: SubscriberSet::new(),
        }),
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Read the value, registering a dependency on it.
    pub fn get(&self) -> T {
        self.inner.subscribers.track();
        self.inner.value.borrow().clone()
    }

    /// Read the value without registering a dependency.
    pub fn peek(&self) -> T {
        untracked(|| self.inner.value.borrow().clone())
    }

    /// Write the value. Dependents are notified only if it changed.
    pub fn set(&self, value: T) {
        let changed = {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        };
        if changed {
            self.inner.subscribers.notify();
        }
    }

    /// Compute the next value from the current one and write it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = {
            let current = self.inner.value.borrow();
            f(&current)
        };
        self.set(next);
    }
}

// =============================================================================
// TESTS
// =============================================================================
