//! Emitter - Multicast subject with queued re-entrant emission.
//!
//! An [`Emitter`] fans one value stream out to any number of observers.
//! Emission is re-entrancy safe: if an observer callback emits again while
//! a delivery is in flight, the new emission is appended to a FIFO queue and
//! delivered by the active drain loop, never nested inside the current
//! delivery. This is the same discipline the stores apply to patches.
//!
//! # Example
//!
//! ```rust
//! use spark_state::stream::{Emitter, Source};
//!
//! let emitter: Emitter<u32> = Emitter::new();
//! let unsubscribe = emitter.subscribe_next(|v| println!("got {v}"));
//!
//! emitter.emit(1);
//! emitter.emit(2);
//! unsubscribe();
//! emitter.emit(3); // not delivered
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::rc::Rc;

use super::source::{Emission, Source, Unsubscribe};

type ObserverCell<T> = Rc<RefCell<Box<dyn FnMut(Emission<T>)>>>;

struct ObserverEntry<T> {
    id: u64,
    callback: ObserverCell<T>,
}

struct EmitterInner<T> {
    observers: Vec<ObserverEntry<T>>,
    next_id: u64,
    queue: VecDeque<Emission<T>>,
    emitting: bool,
    closed: bool,
}

/// A multicast push source.
///
/// Cloning the handle clones the channel, not the stream: all clones share
/// the same observers and the same terminal state.
pub struct Emitter<T> {
    inner: Rc<RefCell<EmitterInner<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Emitter<T> {
    /// Create an open emitter with no observers.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(EmitterInner {
                observers: Vec::new(),
                next_id: 0,
                queue: VecDeque::new(),
                emitting: false,
                closed: false,
            })),
        }
    }

    /// Emit one value to every current observer.
    pub fn emit(&self, value: T) {
        self.push(Emission::Next(value));
    }

    /// Fail the stream. Terminal: observers are dropped after delivery.
    pub fn error(&self, error: impl Error + 'static) {
        self.push(Emission::Error(Rc::new(error)));
    }

    /// Complete the stream. Terminal: observers are dropped after delivery.
    pub fn complete(&self) {
        self.push(Emission::Complete);
    }

    /// True once the emitter has delivered a terminal emission.
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Number of currently attached observers.
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    fn push(&self, emission: Emission<T>) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.queue.push_back(emission);
            if inner.emitting {
                // A delivery is in flight; the active drain loop picks
                // this emission up in order.
                return;
            }
            inner.emitting = true;
        }

        loop {
            let next = self.inner.borrow_mut().queue.pop_front();
            let Some(emission) = next else { break };
            let terminal = matches!(emission, Emission::Error(_) | Emission::Complete);

            // Snapshot the observer list so callbacks may subscribe or
            // unsubscribe without holding the inner borrow.
            let observers: Vec<ObserverCell<T>> = self
                .inner
                .borrow()
                .observers
                .iter()
                .map(|entry| entry.callback.clone())
                .collect();
            for callback in observers {
                (&mut *callback.borrow_mut())(emission.clone());
            }

            if terminal {
                let mut inner = self.inner.borrow_mut();
                inner.closed = true;
                inner.observers.clear();
                inner.queue.clear();
            }
        }

        self.inner.borrow_mut().emitting = false;
    }
}

impl<T: Clone + 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Source<T> for Emitter<T> {
    fn subscribe(&self, mut observer: Box<dyn FnMut(Emission<T>)>) -> Unsubscribe {
        if self.inner.borrow().closed {
            // Late subscription to a finished stream: terminal right away.
            observer(Emission::Complete);
            return Box::new(|| {});
        }

        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push(ObserverEntry {
                id,
                callback: Rc::new(RefCell::new(observer)),
            });
            id
        };

        let weak = Rc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().observers.retain(|entry| entry.id != id);
            }
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fmt;
    use std::rc::Rc;

    #[derive(Debug)]
    struct TestFault;

    impl fmt::Display for TestFault {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test fault")
        }
    }

    impl Error for TestFault {}

    #[test]
    fn test_multicast_delivery() {
        let emitter: Emitter<u32> = Emitter::new();
        let a = Rc::new(RefCell::new(Vec::new()));
        let b = Rc::new(RefCell::new(Vec::new()));

        let a_clone = a.clone();
        let _ua = emitter.subscribe_next(move |v| a_clone.borrow_mut().push(v));
        let b_clone = b.clone();
        let _ub = emitter.subscribe_next(move |v| b_clone.borrow_mut().push(v));

        emitter.emit(1);
        emitter.emit(2);

        assert_eq!(*a.borrow(), vec![1, 2]);
        assert_eq!(*b.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let unsubscribe = emitter.subscribe_next(move |v| seen_clone.borrow_mut().push(v));

        emitter.emit(1);
        unsubscribe();
        emitter.emit(2);

        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(emitter.observer_count(), 0);
    }

    #[test]
    fn test_reentrant_emit_is_queued() {
        let emitter: Emitter<u32> = Emitter::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        // First observer re-emits once while the first delivery is running.
        let reentrant = emitter.clone();
        let order_a = order.clone();
        let _ua = emitter.subscribe_next(move |v| {
            order_a.borrow_mut().push(("a", v));
            if v == 1 {
                reentrant.emit(2);
            }
        });
        let order_b = order.clone();
        let _ub = emitter.subscribe_next(move |v| order_b.borrow_mut().push(("b", v)));

        emitter.emit(1);

        // Delivery of 1 finishes for every observer before 2 begins.
        assert_eq!(
            *order.borrow(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[test]
    fn test_complete_closes_stream() {
        let emitter: Emitter<u32> = Emitter::new();
        let completed = Rc::new(RefCell::new(false));

        let completed_clone = completed.clone();
        let _u = emitter.subscribe(Box::new(move |emission| {
            if matches!(emission, Emission::Complete) {
                *completed_clone.borrow_mut() = true;
            }
        }));

        emitter.complete();
        assert!(*completed.borrow());
        assert!(emitter.is_closed());
        assert_eq!(emitter.observer_count(), 0);

        // Emissions after close are dropped.
        emitter.emit(1);

        // Late subscriber is terminated immediately.
        let late = Rc::new(RefCell::new(false));
        let late_clone = late.clone();
        let _u2 = emitter.subscribe(Box::new(move |emission| {
            *late_clone.borrow_mut() = matches!(emission, Emission::Complete);
        }));
        assert!(*late.borrow());
    }

    #[test]
    fn test_error_is_terminal() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let _u = emitter.subscribe(Box::new(move |emission| {
            seen_clone.borrow_mut().push(format!("{emission:?}"));
        }));

        emitter.emit(1);
        emitter.error(TestFault);
        emitter.emit(2);

        assert_eq!(seen.borrow().len(), 2);
        assert!(seen.borrow()[1].contains("test fault"));
        assert!(emitter.is_closed());
    }
}
