//! Stream Module - Push-based producer plumbing.
//!
//! Containers consume external value sources through the [`Source`] trait:
//! anything that can be subscribed to with an observer callback and returns
//! an [`Unsubscribe`] handle. Producers may emit synchronously during
//! subscribe; the stores' drain loops make that safe.
//!
//! [`Emitter`] is the canonical multicast implementation, used as producer
//! glue and throughout the tests.

mod emitter;
mod source;

pub use emitter::Emitter;
pub use source::{Emission, Source, Unsubscribe};
