//! # spark-state
//!
//! Reactive keyed state containers for Rust.
//!
//! State lives in containers with an explicit, statically declared schema:
//! a plain struct declared through [`state_model!`], updated only through
//! [`Patch`]es that name the fields they write, and observed through keyed
//! subscriptions that notify exactly when a watched field changes.
//!
//! ## Architecture
//!
//! Two interchangeable container variants share one capability,
//! [`StateContainer`]:
//!
//! ```text
//! Patch queue → drain loop → copy-on-write snapshot → keyed channels   (ObservableState, push)
//! Patch queue → drain loop → per-field cells → derived computations    (SignalState, pull)
//! ```
//!
//! Both are single-threaded and re-entrancy safe: every write path runs
//! through a FIFO queue with a single active drain loop, so a subscriber
//! that patches from inside a notification schedules follow-up work
//! instead of nesting.
//!
//! ## Modules
//!
//! - [`model`] - `StateModel` schema trait, `Patch`, the `state_model!` macro
//! - [`store`] - `ObservableState`, `SignalState`, the `StateContainer` trait
//! - [`input`] - `InputState`, host-input batch adapter
//! - [`stream`] - `Source`/`Emission` producer contract, `Emitter` subject
//! - [`reactive`] - `signal`/`derived`/`effect`/`batch` primitives
//! - [`error`] - `StateError`
//!
//! ## Quick start
//!
//! ```rust
//! use spark_state::{state_model, ObservableState};
//!
//! state_model! {
//!     pub struct CartState {
//!         pub count: u32,
//!         pub name: String,
//!     }
//! }
//!
//! let store = ObservableState::new();
//! store.initialize(CartState { count: 0, name: "socks".into() }).unwrap();
//!
//! let counts = store.only_select_when(&["count"]).unwrap();
//! store.patch(CartState::count(3)).unwrap();
//! assert_eq!(counts.latest().count, 3);
//! ```

pub mod error;
pub mod input;
pub mod model;
pub mod reactive;
pub mod store;
pub mod stream;

pub use error::StateError;

pub use model::{changed_keys, is_declared_key, Patch, StateModel};

pub use store::{ObservableState, SignalState, StateContainer, StateView};

pub use input::InputState;

pub use stream::{Emission, Emitter, Source, Unsubscribe};

pub use reactive::{batch, derived, effect, signal, untracked, Derived, Signal};
