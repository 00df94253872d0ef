//! InputState - Host-input adapter over an observable store.
//!
//! Hosts that receive their data as batched property changes (a parent
//! component pushing new input records) own an `InputState` and drive it
//! from their own lifecycle: `on_create` with the initial record,
//! `on_change_batch` with each previous/current pair, `on_destroy` on
//! teardown. The adapter diffs each batch per field and forwards exactly
//! one patch containing only the fields that actually changed, so
//! downstream keyed views keep their one-notification-per-update
//! guarantee.
//!
//! Composition is explicit: the adapter never hooks into a host framework
//! by itself, the host calls it.
//!
//! # Example
//!
//! ```rust
//! use spark_state::{state_model, InputState};
//!
//! state_model! {
//!     pub struct PanelInputs {
//!         pub title: String,
//!         pub width: u32,
//!     }
//! }
//!
//! let inputs = InputState::new();
//! inputs.on_create(PanelInputs { title: "a".into(), width: 80 }).unwrap();
//!
//! let previous = PanelInputs { title: "a".into(), width: 80 };
//! let current = PanelInputs { title: "b".into(), width: 80 };
//! inputs.on_change_batch(&previous, &current).unwrap();
//!
//! assert_eq!(inputs.snapshot().unwrap().title, "b");
//! ```

use std::rc::Rc;

use tracing::debug;

use crate::error::StateError;
use crate::model::{changed_keys, Patch, StateModel};
use crate::store::{ObservableState, StateView};

/// Adapter feeding host input batches into an [`ObservableState`].
///
/// Not `Clone`: the host owns it for the host's lifetime, and `Drop`
/// disposes the inner store.
pub struct InputState<T: StateModel> {
    store: ObservableState<T>,
}

impl<T: StateModel> InputState<T> {
    /// Create an adapter with an uninitialized inner store.
    pub fn new() -> Self {
        Self {
            store: ObservableState::new(),
        }
    }

    /// Initialize from the host's construction-time inputs.
    ///
    /// Optional: a change batch arriving first initializes the adapter
    /// itself (on first delivery every input counts as changed).
    pub fn on_create(&self, initial: T) -> Result<(), StateError> {
        self.store.initialize(initial)
    }

    /// Apply one host change batch.
    ///
    /// The first batch initializes the store from `current`. Every later
    /// batch is diffed per field, and only fields whose value differs
    /// between `previous` and `current` are patched — one patch, hence at
    /// most one notification per watching view.
    pub fn on_change_batch(&self, previous: &T, current: &T) -> Result<(), StateError> {
        if !self.store.is_initialized() {
            return self.store.initialize(current.clone());
        }

        let changed = changed_keys(previous, current);
        if changed.is_empty() {
            return Ok(());
        }
        debug!(keys = ?changed, "forwarding input batch");

        let source = Rc::new(current.clone());
        let mut patch = Patch::new();
        for key in changed {
            let source = source.clone();
            patch = patch.set(key, move |state: &mut T| state.assign_field(&source, key));
        }
        self.store.patch(patch)
    }

    /// Tear down the inner store. Later batches fail with
    /// [`StateError::Disposed`].
    pub fn on_destroy(&self) {
        self.store.dispose();
    }

    /// True once the first record (via `on_create` or a batch) arrived.
    pub fn is_initialized(&self) -> bool {
        self.store.is_initialized()
    }

    /// Synchronous read of the latest input record.
    pub fn snapshot(&self) -> Result<Rc<T>, StateError> {
        self.store.snapshot()
    }

    /// Replay(1) view over the full record.
    pub fn state(&self) -> Result<StateView<T>, StateError> {
        self.store.state()
    }

    /// Replay(1) view filtered to the named input fields.
    pub fn only_select_when(&self, keys: &[&'static str]) -> Result<StateView<T>, StateError> {
        self.store.only_select_when(keys)
    }
}

impl<T: StateModel> Default for InputState<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Source;
    use std::cell::RefCell;

    crate::state_model! {
        struct HostInputs {
            title: String,
            width: u32,
            visible: bool,
        }
    }

    fn record(title: &str, width: u32, visible: bool) -> HostInputs {
        HostInputs {
            title: title.to_string(),
            width,
            visible,
        }
    }

    #[test]
    fn test_on_create_initializes() {
        let inputs = InputState::new();
        assert!(!inputs.is_initialized());

        inputs.on_create(record("a", 80, true)).unwrap();
        assert!(inputs.is_initialized());
        assert_eq!(inputs.snapshot().unwrap().title, "a");
    }

    #[test]
    fn test_first_batch_initializes_without_on_create() {
        let inputs = InputState::new();
        let first = record("a", 80, true);

        // On first delivery the previous record is arbitrary; the adapter
        // initializes from current.
        inputs.on_change_batch(&first, &first).unwrap();
        assert!(inputs.is_initialized());
        assert_eq!(inputs.snapshot().unwrap().width, 80);
    }

    #[test]
    fn test_batch_patches_only_changed_fields() {
        let inputs = InputState::new();
        inputs.on_create(record("a", 80, true)).unwrap();

        let widths = Rc::new(RefCell::new(Vec::new()));
        let view = inputs.only_select_when(&["width"]).unwrap();
        let widths_clone = widths.clone();
        let _unsub = view.subscribe_next(move |snap: Rc<HostInputs>| {
            widths_clone.borrow_mut().push(snap.width);
        });
        assert_eq!(*widths.borrow(), vec![80]);

        // Title-only batch: the width view stays silent.
        let previous = record("a", 80, true);
        let current = record("b", 80, true);
        inputs.on_change_batch(&previous, &current).unwrap();
        assert_eq!(*widths.borrow(), vec![80]);
        assert_eq!(inputs.snapshot().unwrap().title, "b");

        let previous = current;
        let current = record("b", 120, true);
        inputs.on_change_batch(&previous, &current).unwrap();
        assert_eq!(*widths.borrow(), vec![80, 120]);
    }

    #[test]
    fn test_multi_field_batch_is_one_notification() {
        let inputs = InputState::new();
        inputs.on_create(record("a", 80, true)).unwrap();

        let notifications = Rc::new(RefCell::new(Vec::new()));
        let view = inputs.only_select_when(&["title", "width"]).unwrap();
        let notifications_clone = notifications.clone();
        let _unsub = view.subscribe_next(move |snap: Rc<HostInputs>| {
            notifications_clone
                .borrow_mut()
                .push((snap.title.clone(), snap.width));
        });
        assert_eq!(notifications.borrow().len(), 1);

        let previous = record("a", 80, true);
        let current = record("b", 120, false);
        inputs.on_change_batch(&previous, &current).unwrap();

        // Three fields changed, one batch, one notification.
        assert_eq!(notifications.borrow().len(), 2);
        assert_eq!(notifications.borrow()[1], ("b".to_string(), 120));
    }

    #[test]
    fn test_equal_batch_is_silent() {
        let inputs = InputState::new();
        inputs.on_create(record("a", 80, true)).unwrap();

        let count = Rc::new(RefCell::new(0u32));
        let view = inputs.state().unwrap();
        let count_clone = count.clone();
        let _unsub = view.subscribe_next(move |_snap: Rc<HostInputs>| {
            *count_clone.borrow_mut() += 1;
        });
        assert_eq!(*count.borrow(), 1);

        let same = record("a", 80, true);
        inputs.on_change_batch(&same, &same.clone()).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_batches_after_destroy_rejected() {
        let inputs = InputState::new();
        inputs.on_create(record("a", 80, true)).unwrap();
        inputs.on_destroy();

        let previous = record("a", 80, true);
        let current = record("b", 80, true);
        assert_eq!(
            inputs.on_change_batch(&previous, &current).unwrap_err(),
            StateError::Disposed
        );
    }
}
