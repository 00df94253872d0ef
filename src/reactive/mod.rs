//! Reactive Module - Fine-grained reactive primitives.
//!
//! A single-threaded, pull-based reactive graph:
//!
//! - [`signal`] - Independently settable cell with equality-gated writes
//! - [`derived`] - Lazy, memoized computed value with dependency tracking
//! - [`effect`] - Side-effecting subscriber, re-run through a drained FIFO
//! - [`batch`] - Group writes so effects observe one consistent update
//!
//! Dependencies are tracked implicitly: reading a signal or derived inside
//! a derived computation or an effect records the edge, and later writes
//! push invalidation through exactly those edges. Nothing recomputes when
//! only unrelated cells change.
//!
//! # Example
//!
//! ```rust
//! use spark_state::reactive::{signal, derived};
//!
//! let count = signal(1u32);
//! let doubled = {
//!     let count = count.clone();
//!     derived(move || count.get() * 2)
//! };
//!
//! assert_eq!(doubled.get(), 2);
//! count.set(21);
//! assert_eq!(doubled.get(), 42);
//! ```

mod derived;
mod effect;
mod graph;
mod signal;

pub use derived::{derived, Derived};
pub use effect::{batch, effect};
pub use graph::untracked;
pub use signal::{signal, Signal};
