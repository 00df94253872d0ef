//! SignalState - Pull-based keyed state container.
//!
//! Every declared field is backed by an independently bumped version cell;
//! the snapshot lives in one value record read through derived
//! computations. Where the observable variant filters duplicates by
//! comparing snapshots, this variant filters by dependency-graph
//! membership: a derived over the `count` cell simply has no edge to the
//! `name` cell, so a name-only patch cannot reach it. The observable
//! guarantee is identical — no notification when only unwatched fields
//! change.
//!
//! Writes stay single-writer and queued: patches (direct or from bound
//! producers) flow through the same FIFO drain loop discipline as the
//! observable store, and version bumps happen inside a reactive batch so
//! effects always observe one complete patch.
//!
//! # Example
//!
//! ```rust
//! use spark_state::{state_model, SignalState};
//!
//! state_model! {
//!     pub struct CounterState {
//!         pub count: u32,
//!         pub label: String,
//!     }
//! }
//!
//! let store = SignalState::new();
//! store.initialize(CounterState { count: 0, label: "clicks".into() }).unwrap();
//!
//! let count = store.select("count", |s: &CounterState| s.count).unwrap();
//! store.patch(CounterState::count(3)).unwrap();
//! assert_eq!(count.get(), 3);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::StateError;
use crate::model::{is_declared_key, Patch, StateModel};
use crate::reactive::{batch, derived, effect, signal, Derived, Signal};
use crate::stream::{Emission, Source, Unsubscribe};

use super::StateContainer;

// =============================================================================
// CELL BANK
// =============================================================================

/// One version cell per declared key plus the value record they guard.
///
/// A field's cell is bumped only when the field actually changed, so
/// dependency edges fire exactly as often as the observable variant's
/// per-field equality filter would.
struct CellBank<T> {
    value: RefCell<T>,
    versions: Vec<(&'static str, Signal<u64>)>,
}

impl<T: StateModel> CellBank<T> {
    fn new(initial: T) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(initial),
            versions: T::KEYS.iter().map(|key| (*key, signal(0u64))).collect(),
        })
    }

    fn version(&self, key: &str) -> Option<Signal<u64>> {
        self.versions
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, cell)| cell.clone())
    }
}

// =============================================================================
// STORE INNER
// =============================================================================

struct BindingEntry {
    id: u64,
    unsubscribe: Option<Unsubscribe>,
}

struct CleanupEntry {
    id: u64,
    stop: Option<Box<dyn FnOnce()>>,
}

struct SignalStoreInner<T: StateModel> {
    bank: RefCell<Option<Rc<CellBank<T>>>>,
    queue: RefCell<VecDeque<Patch<T>>>,
    draining: Cell<bool>,
    disposed: Cell<bool>,
    bindings: RefCell<Vec<BindingEntry>>,
    cleanups: RefCell<Vec<CleanupEntry>>,
    next_id: Cell<u64>,
}

impl<T: StateModel> SignalStoreInner<T> {
    fn bank(&self) -> Result<Rc<CellBank<T>>, StateError> {
        self.bank
            .borrow()
            .clone()
            .ok_or(StateError::NotInitialized)
    }

    fn enqueue(&self, patch: Patch<T>) -> Result<(), StateError> {
        if self.disposed.get() {
            return Err(StateError::Disposed);
        }
        let bank = self.bank()?;
        self.queue.borrow_mut().push_back(patch);
        self.drain(&bank);
        Ok(())
    }

    /// Same drain discipline as the observable store: strictly ordered,
    /// one patch at a time, re-entrant requests queued.
    fn drain(&self, bank: &Rc<CellBank<T>>) {
        if self.draining.get() {
            return;
        }
        self.draining.set(true);
        loop {
            if self.disposed.get() {
                self.queue.borrow_mut().clear();
                break;
            }
            let next = self.queue.borrow_mut().pop_front();
            let Some(patch) = next else { break };

            trace!(keys = ?patch, "applying patch to cells");
            let previous = bank.value.borrow().clone();
            let mut merged = previous.clone();
            patch.apply(&mut merged);

            let mut touched: Vec<&'static str> = patch.keys().collect();
            touched.sort_unstable();
            touched.dedup();
            let changed: Vec<&'static str> = touched
                .into_iter()
                .filter(|key| !merged.field_eq(&previous, key))
                .collect();

            *bank.value.borrow_mut() = merged;

            // Bump inside a batch: effects over several cells observe one
            // complete patch, never a partial one.
            batch(|| {
                for key in &changed {
                    if let Some(version) = bank.version(key) {
                        version.update(|v| v + 1);
                    }
                }
            });
        }
        self.draining.set(false);
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

    fn remove_cleanup(&self, id: u64) {
        let entry = {
            let mut cleanups = self.cleanups.borrow_mut();
            let index = cleanups.iter().position(|cleanup| cleanup.id == id);
            index.map(|index| cleanups.remove(index))
        };
        if let Some(mut entry) = entry {
            if let Some(stop) = entry.stop.take() {
                stop();
            }
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        debug!("disposing signal state container");
        self.queue.borrow_mut().clear();

        let bindings = std::mem::take(&mut *self.bindings.borrow_mut());
        for mut binding in bindings {
            if let Some(unsubscribe) = binding.unsubscribe.take() {
                unsubscribe();
            }
        }

        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for mut cleanup in cleanups {
            if let Some(stop) = cleanup.stop.take() {
                stop();
            }
        }
    }
}

// =============================================================================
// SIGNAL STATE
// =============================================================================

/// Pull-based keyed state container.
///
/// Interchangeable with [`ObservableState`](super::ObservableState) through
/// [`StateContainer`], but read on demand: consumers hold [`Derived`]
/// handles and pull the value when they need it, paying recomputation only
/// when a dependency cell actually changed.
///
/// Not `Clone`: single owner, disposed on `Drop`.
pub struct SignalState<T: StateModel> {
    inner: Rc<SignalStoreInner<T>>,
}

impl<T: StateModel> SignalState<T> {
    /// Create an uninitialized store.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SignalStoreInner {
                bank: RefCell::new(None),
                queue: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
                disposed: Cell::new(false),
                bindings: RefCell::new(Vec::new()),
                cleanups: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    /// Create one cell per declared field from the given initial values.
    /// May be called exactly once.
    pub fn initialize(&self, initial: T) -> Result<(), StateError> {
        if self.inner.disposed.get() {
            return Err(StateError::Disposed);
        }
        if self.inner.bank.borrow().is_some() {
            return Err(StateError::AlreadyInitialized);
        }
        debug!(keys = ?T::KEYS, "initializing signal state container");
        *self.inner.bank.borrow_mut() = Some(CellBank::new(initial));
        Ok(())
    }

    /// True once `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.inner.bank.borrow().is_some()
    }

    /// Untracked synchronous read of the full snapshot.
    pub fn snapshot(&self) -> Result<Rc<T>, StateError> {
        let bank = self.inner.bank()?;
        let value = bank.value.borrow().clone();
        Ok(Rc::new(value))
    }

    /// The computed full snapshot: recomputes when any field changes.
    pub fn state(&self) -> Result<Derived<T>, StateError> {
        let bank = self.inner.bank()?;
        Ok(derived(move || {
            for (_, version) in &bank.versions {
                version.get();
            }
            bank.value.borrow().clone()
        }))
    }

    /// A readable handle over one field's cell.
    ///
    /// `read` projects the field out of the snapshot; the returned derived
    /// recomputes only when that field's cell changes.
    pub fn select<V: Clone + PartialEq + 'static>(
        &self,
        key: &'static str,
        read: impl Fn(&T) -> V + 'static,
    ) -> Result<Derived<V>, StateError> {
        let bank = self.inner.bank()?;
        let version = bank.version(key).ok_or(StateError::UnknownKey(key))?;
        Ok(derived(move || {
            version.get();
            read(&bank.value.borrow())
        }))
    }

    /// A derived snapshot that recomputes only when one of the named
    /// cells changes. The equality filter of the observable variant is
    /// replaced by dependency-graph membership; the guarantee is the
    /// same: unwatched fields cannot trigger it.
    pub fn only_select_when(&self, keys: &[&'static str]) -> Result<Derived<T>, StateError> {
        let bank = self.inner.bank()?;
        let mut watched = Vec::with_capacity(keys.len());
        for &key in keys {
            watched.push(bank.version(key).ok_or(StateError::UnknownKey(key))?);
        }
        Ok(derived(move || {
            for version in &watched {
                version.get();
            }
            bank.value.borrow().clone()
        }))
    }

    /// Merge named fields into the cells; each actually-changed field
    /// bumps its cell once, and all bumps of one patch land in one batch.
    pub fn patch(&self, patch: Patch<T>) -> Result<(), StateError> {
        self.inner.enqueue(patch)
    }

    /// Bind one producer to one field. Same semantics as the observable
    /// store's `connect`: queued against re-entrancy, producer errors
    /// isolated to this binding, torn down with the store.
    pub fn connect_observables<V: 'static>(
        &self,
        key: &'static str,
        source: &dyn Source<V>,
        write: impl Fn(V) -> Patch<T> + 'static,
    ) -> Result<(), StateError> {
        if self.inner.disposed.get() {
            return Err(StateError::Disposed);
        }
        if !is_declared_key::<T>(key) {
            return Err(StateError::UnknownKey(key));
        }
        self.inner.bank()?;

        let id = self.inner.next_id();
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
                    warn!(field = key, error = %error, "producer fault, disabling binding");
                    dead_flag.set(true);
                    store.remove_binding(id);
                }
                Emission::Complete => {}
            }
        }));

        if dead.get() {
            unsubscribe();
            return Ok(());
        }

        self.inner.bindings.borrow_mut().push(BindingEntry {
            id,
            unsubscribe: Some(unsubscribe),
        });
        Ok(())
    }

    /// Wire a derived readable into a field's cell via a reactive effect:
    /// whenever `source` recomputes, its value is patched into `key`.
    /// Enables store-internal derived fields (filtered or paged views
    /// computed from other fields) without an external producer.
    pub fn connect_signals<V: Clone + PartialEq + 'static>(
        &self,
        key: &'static str,
        source: Derived<V>,
        write: impl Fn(V) -> Patch<T> + 'static,
    ) -> Result<(), StateError> {
        if self.inner.disposed.get() {
            return Err(StateError::Disposed);
        }
        if !is_declared_key::<T>(key) {
            return Err(StateError::UnknownKey(key));
        }
        self.inner.bank()?;

        let weak = Rc::downgrade(&self.inner);
        let stop = effect(move || {
            let value = source.get();
            if let Some(store) = weak.upgrade() {
                if !store.disposed.get() {
                    let _ = store.enqueue(write(value));
                }
            }
        });

        let id = self.inner.next_id();
        self.inner.cleanups.borrow_mut().push(CleanupEntry {
            id,
            stop: Some(Box::new(stop)),
        });
        Ok(())
    }

    /// Tear the store down: bindings unsubscribed, effects stopped,
    /// queued patches discarded. Idempotent; also runs on `Drop`.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<T: StateModel> Default for SignalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StateModel> Drop for SignalState<T> {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<T: StateModel> StateContainer<T> for SignalState<T> {
    fn initialize(&self, initial: T) -> Result<(), StateError> {
        SignalState::initialize(self, initial)
    }

    fn snapshot(&self) -> Result<Rc<T>, StateError> {
        SignalState::snapshot(self)
    }

    fn patch(&self, patch: Patch<T>) -> Result<(), StateError> {
        SignalState::patch(self, patch)
    }

    fn watch(
        &self,
        keys: &[&'static str],
        mut callback: Box<dyn FnMut(Rc<T>)>,
    ) -> Result<Unsubscribe, StateError> {
        let view = self.only_select_when(keys)?;
        let stop = effect(move || {
            let snapshot = view.get();
            callback(Rc::new(snapshot));
        });

        let id = self.inner.next_id();
        self.inner.cleanups.borrow_mut().push(CleanupEntry {
            id,
            stop: Some(Box::new(stop)),
        });

        let weak = Rc::downgrade(&self.inner);
        Ok(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_cleanup(id);
            }
        }))
    }

    fn dispose(&self) {
        SignalState::dispose(self);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Emitter;

    crate::state_model! {
        struct AppState {
            count: u32,
            name: String,
            doubled: u32,
        }
    }

    fn make_store() -> SignalState<AppState> {
        let store = SignalState::new();
        store
            .initialize(AppState {
                count: 1,
                name: "a".to_string(),
                doubled: 0,
            })
            .unwrap();
        store
    }

    #[test]
    fn test_errors_before_initialize() {
        let store: SignalState<AppState> = SignalState::new();
        assert_eq!(store.snapshot().unwrap_err(), StateError::NotInitialized);
        assert_eq!(
            store.select("count", |s: &AppState| s.count).unwrap_err(),
            StateError::NotInitialized
        );
        assert_eq!(
            store.patch(AppState::count(1)).unwrap_err(),
            StateError::NotInitialized
        );
    }

    #[test]
    fn test_initialize_exactly_once() {
        let store = make_store();
        let again = store.initialize(AppState {
            count: 2,
            name: "b".to_string(),
            doubled: 0,
        });
        assert_eq!(again.unwrap_err(), StateError::AlreadyInitialized);
    }

    #[test]
    fn test_select_reads_one_cell() {
        let store = make_store();
        let count = store.select("count", |s: &AppState| s.count).unwrap();
        assert_eq!(count.get(), 1);

        store.patch(AppState::count(5)).unwrap();
        assert_eq!(count.get(), 5);
    }

    #[test]
    fn test_select_ignores_other_cells() {
        let store = make_store();
        let recomputes = Rc::new(Cell::new(0u32));

        let recomputes_clone = recomputes.clone();
        let count = store
            .select("count", move |s: &AppState| {
                recomputes_clone.set(recomputes_clone.get() + 1);
                s.count
            })
            .unwrap();

        count.get();
        assert_eq!(recomputes.get(), 1);

        store.patch(AppState::name("b".to_string())).unwrap();
        count.get();
        assert_eq!(recomputes.get(), 1); // untouched cell, served from cache

        store.patch(AppState::count(2)).unwrap();
        count.get();
        assert_eq!(recomputes.get(), 2);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let store = make_store();
        assert_eq!(
            store
                .select("missing", |s: &AppState| s.count)
                .unwrap_err(),
            StateError::UnknownKey("missing")
        );
        assert_eq!(
            store.only_select_when(&["missing"]).unwrap_err(),
            StateError::UnknownKey("missing")
        );
    }

    #[test]
    fn test_patch_with_equal_value_bumps_nothing() {
        let store = make_store();
        let runs = Rc::new(Cell::new(0u32));

        let view = store.only_select_when(&["count"]).unwrap();
        let runs_clone = runs.clone();
        let _stop = effect(move || {
            view.get();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        store.patch(AppState::count(1)).unwrap(); // same value
        assert_eq!(runs.get(), 1);

        store.patch(AppState::count(2)).unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_multi_field_patch_is_one_update() {
        let store = make_store();
        let runs = Rc::new(Cell::new(0u32));

        let view = store.only_select_when(&["count", "name"]).unwrap();
        let runs_clone = runs.clone();
        let _stop = effect(move || {
            view.get();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        store
            .patch(AppState::count(9).and(AppState::name("z".to_string())))
            .unwrap();
        // Both cells bumped in one batch: one recomputation, one run.
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_state_composes_all_cells() {
        let store = make_store();
        let state = store.state().unwrap();

        assert_eq!(state.get().count, 1);
        store.patch(AppState::name("b".to_string())).unwrap();
        assert_eq!(state.get().name, "b");
    }

    #[test]
    fn test_connect_observables_feeds_cell() {
        let store = make_store();
        let producer: Emitter<u32> = Emitter::new();
        store
            .connect_observables("count", &producer, AppState::count)
            .unwrap();

        producer.emit(7);
        assert_eq!(store.snapshot().unwrap().count, 7);
    }

    #[test]
    fn test_connect_signals_derives_internal_field() {
        let store = make_store();
        let count = store.select("count", |s: &AppState| s.count).unwrap();
        let double = derived(move || count.get() * 2);

        store
            .connect_signals("doubled", double, AppState::doubled)
            .unwrap();
        // The effect ran once immediately with the current value.
        assert_eq!(store.snapshot().unwrap().doubled, 2);

        store.patch(AppState::count(10)).unwrap();
        assert_eq!(store.snapshot().unwrap().doubled, 20);
    }

    #[test]
    fn test_dispose_stops_bindings_and_effects() {
        let store = make_store();
        let producer: Emitter<u32> = Emitter::new();
        store
            .connect_observables("count", &producer, AppState::count)
            .unwrap();

        let count = store.select("count", |s: &AppState| s.count).unwrap();
        let double = derived(move || count.get() * 2);
        store
            .connect_signals("doubled", double, AppState::doubled)
            .unwrap();

        store.dispose();
        assert_eq!(producer.observer_count(), 0);

        producer.emit(50);
        assert_eq!(store.snapshot().unwrap().count, 1); // unchanged
        assert_eq!(
            store.patch(AppState::count(2)).unwrap_err(),
            StateError::Disposed
        );
        store.dispose(); // idempotent
    }

    #[test]
    fn test_watch_pushes_snapshots() {
        let store = make_store();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let unsubscribe = store
            .watch(
                &["count"],
                Box::new(move |snap| seen_clone.borrow_mut().push(snap.count)),
            )
            .unwrap();

        assert_eq!(*seen.borrow(), vec![1]); // immediate delivery
        store.patch(AppState::count(2)).unwrap();
        store.patch(AppState::name("b".to_string())).unwrap(); // unwatched
        assert_eq!(*seen.borrow(), vec![1, 2]);

        unsubscribe();
        store.patch(AppState::count(3)).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }
}
