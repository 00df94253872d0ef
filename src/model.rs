//! State Model - Declared schemas and partial updates.
//!
//! Every container in this crate is generic over a snapshot type that
//! implements [`StateModel`]: a plain struct plus an explicit, statically
//! declared schema (field names, per-field equality, per-field assignment).
//! There is no runtime reflection; the [`state_model!`] macro derives the
//! whole schema from an ordinary struct declaration.
//!
//! A [`Patch`] is an ordered list of per-field writes. Applying a patch
//! never mutates the previous snapshot: containers clone the current value
//! and run the patch on the copy (copy-on-write).
//!
//! # Example
//!
//! ```rust
//! use spark_state::state_model;
//!
//! state_model! {
//!     pub struct CartState {
//!         pub count: u32,
//!         pub name: String,
//!     }
//! }
//!
//! // One-field patches compose with `.and(..)`:
//! let patch = CartState::count(3).and(CartState::name("socks".to_string()));
//! assert_eq!(patch.keys().collect::<Vec<_>>(), vec!["count", "name"]);
//! ```

use std::fmt;
use std::rc::Rc;

// =============================================================================
// STATE MODEL TRAIT
// =============================================================================

/// A named-field snapshot with an explicitly declared schema.
///
/// Implemented by the [`state_model!`] macro. Hand-written implementations
/// must keep the three members consistent: `KEYS` lists every field exactly
/// once, and `field_eq`/`assign_field` must recognize every listed key.
pub trait StateModel: Clone + PartialEq + 'static {
    /// The declared field names, in declaration order.
    const KEYS: &'static [&'static str];

    /// Compare one named field between two snapshots.
    ///
    /// Unknown keys compare equal (they can never trigger a notification).
    fn field_eq(&self, other: &Self, key: &str) -> bool;

    /// Copy one named field from `source` into `self`.
    fn assign_field(&mut self, source: &Self, key: &str);
}

/// Check whether `key` is part of `T`'s declared schema.
pub fn is_declared_key<T: StateModel>(key: &str) -> bool {
    T::KEYS.iter().any(|k| *k == key)
}

/// The declared keys on which `previous` and `current` differ.
pub fn changed_keys<T: StateModel>(previous: &T, current: &T) -> Vec<&'static str> {
    T::KEYS
        .iter()
        .copied()
        .filter(|key| !current.field_eq(previous, key))
        .collect()
}

// =============================================================================
// PATCH
// =============================================================================

struct PatchOp<T> {
    key: &'static str,
    write: Rc<dyn Fn(&mut T)>,
}

impl<T> Clone for PatchOp<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            write: self.write.clone(),
        }
    }
}

/// An ordered partial update over a [`StateModel`].
///
/// Each op names the single field it writes. Containers apply a patch as one
/// unit: clone the current snapshot, run every op in order, publish once.
/// Patches are cheap to clone (ops are shared), which lets them travel
/// through producer streams and FIFO queues.
pub struct Patch<T> {
    ops: Vec<PatchOp<T>>,
}

impl<T> Clone for Patch<T> {
    fn clone(&self) -> Self {
        Self {
            ops: self.ops.clone(),
        }
    }
}

impl<T> Patch<T> {
    /// The empty patch. Applying it changes nothing and notifies nobody.
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Append a write for one named field.
    ///
    /// The closure must write only the field it is registered under;
    /// per-field change detection relies on it.
    pub fn set(mut self, key: &'static str, write: impl Fn(&mut T) + 'static) -> Self {
        self.ops.push(PatchOp {
            key,
            write: Rc::new(write),
        });
        self
    }

    /// Concatenate two patches, preserving op order.
    pub fn and(mut self, other: Patch<T>) -> Self {
        self.ops.extend(other.ops);
        self
    }

    /// The keys this patch touches, in op order (duplicates possible).
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.iter().map(|op| op.key)
    }

    /// True if the patch contains no ops.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of ops in the patch.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Run every op against `target`, in order.
    pub(crate) fn apply(&self, target: &mut T) {
        for op in &self.ops {
            (op.write)(target);
        }
    }
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Patch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

// =============================================================================
// STATE MODEL MACRO
// =============================================================================

/// Declare a state struct together with its schema.
///
/// Expands to the struct itself (with `Clone`, `Debug`, `PartialEq`
/// derived), a [`StateModel`] implementation, and one associated patch
/// constructor per field: `Model::field(value)` builds a one-field
/// [`Patch`], and patches chain with [`Patch::and`].
///
/// Every field type must be `Clone + PartialEq + 'static`.
///
/// # Example
///
/// ```rust
/// use spark_state::state_model;
///
/// state_model! {
///     pub struct ProductState {
///         pub id: u64,
///         pub price: u32,
///     }
/// }
///
/// let patch = ProductState::price(1250);
/// assert_eq!(patch.len(), 1);
/// ```
#[macro_export]
macro_rules! state_model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $fty:ty
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $fty,
            )+
        }

        impl $crate::model::StateModel for $name {
            const KEYS: &'static [&'static str] = &[$(stringify!($field)),+];

            fn field_eq(&self, other: &Self, key: &str) -> bool {
                match key {
                    $(stringify!($field) => self.$field == other.$field,)+
                    _ => true,
                }
            }

            fn assign_field(&mut self, source: &Self, key: &str) {
                match key {
                    $(stringify!($field) => self.$field = source.$field.clone(),)+
                    _ => {}
                }
            }
        }

        impl $name {
            $(
                #[doc = concat!("Build a one-field patch setting `", stringify!($field), "`.")]
                $fvis fn $field(value: $fty) -> $crate::model::Patch<Self> {
                    $crate::model::Patch::new().set(stringify!($field), move |state: &mut Self| {
                        state.$field = value.clone();
                    })
                }
            )+
        }
    };
}

// =============================================================================
// TESTS
// =============================================================================
