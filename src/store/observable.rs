//! ObservableState - Push-based keyed state container.
//!
//! Holds the current snapshot behind a single writer, applies partial
//! updates through a FIFO drain loop, and publishes each new snapshot to
//! replay-buffered multicast channels: one for the full field set
//! ([`ObservableState::state`]) and one per watched key set
//! ([`ObservableState::only_select_when`]). A channel notifies only when
//! one of its watched fields actually changed.
//!
//! Re-entrancy discipline: a patch requested while another patch is being
//! applied (a producer emitting synchronously at subscribe time, or a
//! subscriber callback patching back) is appended to the queue, never
//! applied inline. The active drain loop processes the queue to exhaustion,
//! one patch at a time, so no partial or interleaved snapshot is ever
//! observable.
//!
//! # Example
//!
//! ```rust
//! use spark_state::{state_model, ObservableState, Source};
//!
//! state_model! {
//!     pub struct CounterState {
//!         pub count: u32,
//!         pub label: String,
//!     }
//! }
//!
//! let store = ObservableState::new();
//! store.initialize(CounterState { count: 0, label: "clicks".into() }).unwrap();
//!
//! let clicks = store.only_select_when(&["count"]).unwrap();
//! let _sub = clicks.subscribe_next(|snap| println!("count: {}", snap.count));
//!
//! store.patch(CounterState::count(1)).unwrap();
//! assert_eq!(store.snapshot().unwrap().count, 1);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::StateError;
use crate::model::{is_declared_key, Patch, StateModel};
use crate::stream::{Emission, Source, Unsubscribe};

use super::StateContainer;

// =============================================================================
// KEYED CHANNELS
// =============================================================================

type ChannelObserver<T> = Rc<RefCell<Box<dyn FnMut(Emission<Rc<T>>)>>>;

struct ObserverEntry<T> {
    id: u64,
    callback: ChannelObserver<T>,
}

/// One multicast channel filtered by a watched key set.
///
/// `last` is the replay buffer (capacity 1): the most recent snapshot that
/// passed this channel's distinct filter. It is shared by every consumer of
/// the same key set.
struct Channel<T> {
    keys: Vec<&'static str>,
    last: RefCell<Rc<T>>,
    observers: RefCell<Vec<ObserverEntry<T>>>,
    next_id: Cell<u64>,
    completed: Cell<bool>,
    delivering: Cell<bool>,
    pending_complete: Cell<bool>,
}

impl<T: StateModel> Channel<T> {
    fn new(keys: Vec<&'static str>, initial: Rc<T>) -> Rc<Self> {
        Rc::new(Self {
            keys,
            last: RefCell::new(initial),
            observers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            completed: Cell::new(false),
            delivering: Cell::new(false),
            pending_complete: Cell::new(false),
        })
    }

    /// Offer a new snapshot: delivered iff a watched field changed since
    /// the last delivery on this channel.
    fn offer(&self, next: &Rc<T>) {
        if self.completed.get() {
            return;
        }
        let changed = {
            let last = self.last.borrow();
            self.keys.iter().any(|key| !next.field_eq(&last, key))
        };
        if !changed {
            return;
        }
        *self.last.borrow_mut() = next.clone();
        self.deliver(Emission::Next(next.clone()));
    }

    fn deliver(&self, emission: Emission<Rc<T>>) {
        // Snapshot the observer list; callbacks may subscribe, unsubscribe
        // or patch re-entrantly.
        let observers: Vec<ChannelObserver<T>> = self
            .observers
            .borrow()
            .iter()
            .map(|entry| entry.callback.clone())
            .collect();
        self.delivering.set(true);
        for callback in observers {
            // A callback may have disposed the store: once the channel is
            // completed, the in-flight value reaches nobody else.
            if self.completed.get() && matches!(emission, Emission::Next(_)) {
                break;
            }
            // A borrowed cell is the observer whose own callback triggered
            // this delivery; it is skipped, never re-entered.
            if let Ok(mut callback) = callback.try_borrow_mut() {
                (&mut *callback)(emission.clone());
            }
        }
        self.delivering.set(false);
        if self.pending_complete.replace(false) {
            self.finish();
        }
    }

    fn complete(&self) {
        if self.completed.replace(true) {
            return;
        }
        if self.delivering.get() {
            // Mid-delivery teardown: the terminal emission waits for the
            // in-flight delivery to unwind.
            self.pending_complete.set(true);
            return;
        }
        self.finish();
    }

    fn finish(&self) {
        self.deliver(Emission::Complete);
        self.observers.borrow_mut().clear();
    }
}

/// A replay-buffered view over a store, filtered by a key set.
///
/// Implements [`Source`], so a view can in turn feed another store's
/// `connect`. Subscribers immediately receive the channel's replay value,
/// then every update on which a watched field changed. After the owning
/// store is disposed, subscribers receive `Complete` and nothing else.
pub struct StateView<T: StateModel> {
    channel: Rc<Channel<T>>,
}

impl<T: StateModel> Clone for StateView<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T: StateModel> fmt::Debug for StateView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateView")
            .field("keys", &self.channel.keys)
            .finish_non_exhaustive()
    }
}

impl<T: StateModel> StateView<T> {
    /// The replay value: the last snapshot delivered through this view's
    /// filter.
    pub fn latest(&self) -> Rc<T> {
        self.channel.last.borrow().clone()
    }

    /// The watched keys, sorted and deduplicated.
    pub fn keys(&self) -> &[&'static str] {
        &self.channel.keys
    }
}

impl<T: StateModel> Source<Rc<T>> for StateView<T> {
    fn subscribe(&self, mut observer: Box<dyn FnMut(Emission<Rc<T>>)>) -> Unsubscribe {
        if self.channel.completed.get() {
            observer(Emission::Complete);
            return Box::new(|| {});
        }

        // Replay before registering, so a re-entrant patch from the
        // callback cannot double-deliver the same snapshot.
        observer(Emission::Next(self.channel.last.borrow().clone()));

        let id = self.channel.next_id.get();
        self.channel.next_id.set(id + 1);
        self.channel.observers.borrow_mut().push(ObserverEntry {
            id,
            callback: Rc::new(RefCell::new(observer)),
        });

        let weak = Rc::downgrade(&self.channel);
        Box::new(move || {
            if let Some(channel) = weak.upgrade() {
                channel.observers.borrow_mut().retain(|entry| entry.id != id);
            }
        })
    }
}

// =============================================================================
// STORE INNER
// =============================================================================

struct BindingEntry {
    id: u64,
    unsubscribe: Option<Unsubscribe>,
}

struct StoreInner<T: StateModel> {
    current: RefCell<Option<Rc<T>>>,
    queue: RefCell<VecDeque<Patch<T>>>,
    draining: Cell<bool>,
    disposed: Cell<bool>,
    channels: RefCell<Vec<Rc<Channel<T>>>>,
    bindings: RefCell<Vec<BindingEntry>>,
    next_binding_id: Cell<u64>,
}

impl<T: StateModel> StoreInner<T> {
    fn snapshot(&self) -> Result<Rc<T>, StateError> {
        self.current
            .borrow()
            .clone()
            .ok_or(StateError::NotInitialized)
    }

    /// Enqueue a patch and drain unless a drain loop is already active.
    fn enqueue(&self, patch: Patch<T>) -> Result<(), StateError> {
        if self.disposed.get() {
            return Err(StateError::Disposed);
        }
        if self.current.borrow().is_none() {
            return Err(StateError::NotInitialized);
        }
        self.queue.borrow_mut().push_back(patch);
        self.drain();
        Ok(())
    }

    /// The single-threaded drain loop: applies queued patches strictly in
    /// order, each one merge-then-notify to completion, until the queue is
    /// exhausted. Re-entrant calls return immediately; the active loop
    /// picks their work up.
    fn drain(&self) {
        if self.draining.get() {
            return;
        }
        self.draining.set(true);
        loop {
            if self.disposed.get() {
                // Queued but undrained patches are discarded at teardown.
                self.queue.borrow_mut().clear();
                break;
            }
            let next = self.queue.borrow_mut().pop_front();
            let Some(patch) = next else { break };
            let Some(previous) = self.current.borrow().clone() else {
                break;
            };

            trace!(keys = ?patch, "applying patch");
            let mut merged = (*previous).clone();
            patch.apply(&mut merged);
            let next_snapshot = Rc::new(merged);
            *self.current.borrow_mut() = Some(next_snapshot.clone());

            let channels: Vec<Rc<Channel<T>>> = self.channels.borrow().clone();
            for channel in channels {
                channel.offer(&next_snapshot);
            }
        }
        self.draining.set(false);
    }

    /// Find or create the shared channel for a sorted, deduplicated key
    /// set. One underlying channel serves every consumer of the same keys.
    fn channel_for(&self, keys: Vec<&'static str>) -> Result<Rc<Channel<T>>, StateError> {
        let current = self.snapshot()?;
        if let Some(existing) = self
            .channels
            .borrow()
            .iter()
            .find(|channel| channel.keys == keys)
        {
            return Ok(existing.clone());
        }
        let channel = Channel::new(keys, current);
        self.channels.borrow_mut().push(channel.clone());
        Ok(channel)
    }

    fn remove_binding(&self, id: u64) {
        let entry = {
            let mut bindings = self.bindings.borrow_mut();
            let index = bindings.iter().position(|binding| binding.id == id);
            index.map(|index| bindings.remove(index))
        };
        if let Some(mut entry) = entry {
            if let Some(unsubscribe) = entry.unsubscribe.take() {
                unsubscribe();
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        debug!("disposing observable state container");
        self.queue.borrow_mut().clear();

        let bindings = std::mem::take(&mut *self.bindings.borrow_mut());
        for mut binding in bindings {
            if let Some(unsubscribe) = binding.unsubscribe.take() {
                unsubscribe();
            }
        }

        let channels = std::mem::take(&mut *self.channels.borrow_mut());
        for channel in channels {
            channel.complete();
        }
    }
}

// =============================================================================
// OBSERVABLE STATE
// =============================================================================

/// Push-based keyed state container.
///
/// Single-writer: the store exclusively owns and replaces the snapshot;
/// external actors read via [`snapshot`](Self::snapshot) or subscriptions
/// and request changes via [`patch`](Self::patch) /
/// [`connect`](Self::connect). Snapshots handed out are immutable `Rc<T>`
/// values — patches clone and replace, never mutate in place.
///
/// The store is not `Clone`: it has one owner, and dropping the owner
/// disposes it (every binding and subscription is released on every exit
/// path).
pub struct ObservableState<T: StateModel> {
    inner: Rc<StoreInner<T>>,
}

impl<T: StateModel> ObservableState<T> {
    /// Create an uninitialized store.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner {
                current: RefCell::new(None),
                queue: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
                disposed: Cell::new(false),
                channels: RefCell::new(Vec::new()),
                bindings: RefCell::new(Vec::new()),
                next_binding_id: Cell::new(0),
            }),
        }
    }

    /// Set the first snapshot. May be called exactly once; a second call
    /// fails with [`StateError::AlreadyInitialized`].
    pub fn initialize(&self, initial: T) -> Result<(), StateError> {
        if self.inner.disposed.get() {
            return Err(StateError::Disposed);
        }
        if self.inner.current.borrow().is_some() {
            return Err(StateError::AlreadyInitialized);
        }
        debug!(keys = ?T::KEYS, "initializing observable state container");
        *self.inner.current.borrow_mut() = Some(Rc::new(initial));
        Ok(())
    }

    /// Initialize and attach a secondary patch source whose emissions are
    /// applied through the queue, for hosts that already own a stream of
    /// partial updates.
    pub fn initialize_with_source(
        &self,
        initial: T,
        source: &dyn Source<Patch<T>>,
    ) -> Result<(), StateError> {
        self.initialize(initial)?;
        self.bind("source", source, |patch: Patch<T>| patch)
    }

    /// True once `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    /// Synchronous read of the latest snapshot.
    pub fn snapshot(&self) -> Result<Rc<T>, StateError> {
        self.inner.snapshot()
    }

    /// The full-state subscription: replay-buffered, notifying on every
    /// update that changed at least one field.
    pub fn state(&self) -> Result<StateView<T>, StateError> {
        let mut keys = T::KEYS.to_vec();
        keys.sort_unstable();
        Ok(StateView {
            channel: self.inner.channel_for(keys)?,
        })
    }

    /// A keyed view: notifies iff one of `keys` changed since the value
    /// last delivered on that view. Views over the same key set share one
    /// underlying channel, so producer side effects are never duplicated
    /// by additional consumers.
    pub fn only_select_when(&self, keys: &[&'static str]) -> Result<StateView<T>, StateError> {
        for &key in keys {
            if !is_declared_key::<T>(key) {
                return Err(StateError::UnknownKey(key));
            }
        }
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();
        Ok(StateView {
            channel: self.inner.channel_for(keys)?,
        })
    }

    /// Merge a partial update into a new snapshot and publish it as one
    /// event. Fields the patch does not name carry over unchanged.
    pub fn patch(&self, patch: Patch<T>) -> Result<(), StateError> {
        self.inner.enqueue(patch)
    }

    /// Bind one producer to one field: every `Next` value becomes a
    /// one-field patch built by `write`, applied through the queue.
    ///
    /// A producer `Error` disables only this binding (logged, isolated);
    /// `Complete` is a no-op. All bindings are torn down together when the
    /// store is disposed.
    pub fn connect<V: 'static>(
        &self,
        key: &'static str,
        source: &dyn Source<V>,
        write: impl Fn(V) -> Patch<T> + 'static,
    ) -> Result<(), StateError> {
        if !is_declared_key::<T>(key) {
            return Err(StateError::UnknownKey(key));
        }
        self.bind(key, source, write)
    }

    fn bind<V: 'static>(
        &self,
        key: &'static str,
        source: &dyn Source<V>,
        write: impl Fn(V) -> Patch<T> + 'static,
    ) -> Result<(), StateError> {
        if self.inner.disposed.get() {
            return Err(StateError::Disposed);
        }
        if self.inner.current.borrow().is_none() {
            return Err(StateError::NotInitialized);
        }

        let id = self.inner.next_binding_id.get();
        self.inner.next_binding_id.set(id + 1);

        let weak = Rc::downgrade(&self.inner);
        let dead = Rc::new(Cell::new(false));
        let dead_flag = dead.clone();

        let unsubscribe = source.subscribe(Box::new(move |emission| {
            let Some(store) = weak.upgrade() else { return };
            match emission {
                Emission::Next(value) => {
                    if !store.disposed.get() {
                        let _ = store.enqueue(write(value));
                    }
                }
                Emission::Error(error) => {
                    // Fault isolation: this binding dies, the store and
                    // every other binding keep running.
                    warn!(field = key, error = %error, "producer fault, disabling binding");
                    dead_flag.set(true);
                    store.remove_binding(id);
                }
                Emission::Complete => {}
            }
        }));

        if dead.get() {
            // The producer failed synchronously during subscribe; never
            // register the binding.
            unsubscribe();
            return Ok(());
        }

        self.inner.bindings.borrow_mut().push(BindingEntry {
            id,
            unsubscribe: Some(unsubscribe),
        });
        Ok(())
    }

    /// Tear the store down: all bindings unsubscribed atomically, all
    /// views completed, queued patches discarded. Idempotent; also runs
    /// on `Drop`.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<T: StateModel> Default for ObservableState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StateModel> Drop for ObservableState<T> {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<T: StateModel> StateContainer<T> for ObservableState<T> {
    fn initialize(&self, initial: T) -> Result<(), StateError> {
        ObservableState::initialize(self, initial)
    }

    fn snapshot(&self) -> Result<Rc<T>, StateError> {
        ObservableState::snapshot(self)
    }

    fn patch(&self, patch: Patch<T>) -> Result<(), StateError> {
        ObservableState::patch(self, patch)
    }

    fn watch(
        &self,
        keys: &[&'static str],
        mut callback: Box<dyn FnMut(Rc<T>)>,
    ) -> Result<Unsubscribe, StateError> {
        let view = self.only_select_when(keys)?;
        Ok(view.subscribe(Box::new(move |emission| {
            if let Emission::Next(snapshot) = emission {
                callback(snapshot);
            }
        })))
    }

    fn dispose(&self) {
        ObservableState::dispose(self);
    }
}

// =============================================================================
// TESTS
// =============================================================================
