//! Source trait - The producer boundary contract.

use std::error::Error;
use std::fmt;
use std::rc::Rc;

/// Handle that tears down one subscription when called.
pub type Unsubscribe = Box<dyn FnOnce()>;

/// One event delivered to an observer.
///
/// A well-behaved producer emits zero or more `Next` values followed by at
/// most one terminal emission (`Error` or `Complete`). Nothing is delivered
/// after a terminal emission.
pub enum Emission<T> {
    /// A produced value.
    Next(T),
    /// The producer failed. Terminal for this producer only; containers
    /// isolate the fault to the one binding that owns the subscription.
    Error(Rc<dyn Error>),
    /// The producer is done. A no-op for containers: the binding simply
    /// stops emitting.
    Complete,
}

impl<T: Clone> Clone for Emission<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Next(value) => Self::Next(value.clone()),
            Self::Error(error) => Self::Error(error.clone()),
            Self::Complete => Self::Complete,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Emission<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(value) => f.debug_tuple("Next").field(value).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(&error.to_string()).finish(),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// An external value source bound to a consumer via `subscribe`.
///
/// The returned [`Unsubscribe`] must stop all further deliveries to that
/// observer when called. Producers are allowed to emit synchronously from
/// inside `subscribe` itself.
pub trait Source<T> {
    /// Attach an observer; returns the handle that detaches it.
    fn subscribe(&self, observer: Box<dyn FnMut(Emission<T>)>) -> Unsubscribe;

    /// Convenience: subscribe to `Next` values only, ignoring terminals.
    fn subscribe_next(&self, mut on_next: impl FnMut(T) + 'static) -> Unsubscribe
    where
        Self: Sized,
        T: 'static,
    {
        self.subscribe(Box::new(move |emission| {
            if let Emission::Next(value) = emission {
                on_next(value);
            }
        }))
    }
}
