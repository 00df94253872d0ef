//! Store Module - Keyed reactive state containers.
//!
//! Two interchangeable containers implement the [`StateContainer`]
//! capability:
//!
//! - [`ObservableState`] - push-based: patches flow through a FIFO drain
//!   loop into replay-buffered multicast channels
//! - [`SignalState`] - pull-based: independently settable cells composed
//!   into computed snapshots, filtered by dependency tracking
//!
//! Pick per consumer: view-models that react to pushed updates take the
//! observable variant; view-models that read on demand take the signal
//! variant. The notification guarantees are identical — at most one
//! notification per patch, and none when only unwatched fields change.

pub mod observable;
pub mod signal;

pub use observable::{ObservableState, StateView};
pub use signal::SignalState;

use std::rc::Rc;

use crate::error::StateError;
use crate::model::{Patch, StateModel};
use crate::stream::Unsubscribe;

/// The abstract keyed reactive store capability.
///
/// Everything a consumer needs from a store, independent of the push/pull
/// variant: initialize once, read the snapshot, request merges via patches,
/// and subscribe by keys.
pub trait StateContainer<T: StateModel> {
    /// Set the first snapshot. Exactly once per container.
    fn initialize(&self, initial: T) -> Result<(), StateError>;

    /// Synchronous read of the latest snapshot.
    fn snapshot(&self) -> Result<Rc<T>, StateError>;

    /// Merge the named fields into a new snapshot; at most one
    /// notification per subscription results.
    fn patch(&self, patch: Patch<T>) -> Result<(), StateError>;

    /// Subscribe by keys: `callback` receives the current snapshot
    /// immediately, then again whenever one of the watched fields changes.
    fn watch(
        &self,
        keys: &[&'static str],
        callback: Box<dyn FnMut(Rc<T>)>,
    ) -> Result<Unsubscribe, StateError>;

    /// Tear the container down: unbind producers, drop subscriptions,
    /// discard queued work. Idempotent.
    fn dispose(&self);
}
