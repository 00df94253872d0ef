//! Error taxonomy for state containers.
//!
//! Invariant violations are loud and immediate: they are returned to the
//! caller at the call site and never recovered internally. Producer faults
//! are not part of this enum; they travel through `stream::Emission::Error`
//! and are isolated per binding (see `store`).

use thiserror::Error;

/// Errors returned by state container operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The container is not initialized yet, call the `initialize()` method.
    #[error("state is not initialized yet, call the initialize() method")]
    NotInitialized,

    /// `initialize()` was called more than once.
    #[error("state is already initialized, initialize() may be called exactly once")]
    AlreadyInitialized,

    /// A key was used that is not part of the declared state schema.
    #[error("unknown state key `{0}`")]
    UnknownKey(&'static str),

    /// The container has been disposed; no further writes are accepted.
    #[error("state container has been disposed")]
    Disposed,
}
