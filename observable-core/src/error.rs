//! Error types for the observable engine.

use thiserror::Error;

use crate::reactive::ObserverId;
use crate::value::{Key, Shape};

/// Errors surfaced by cell creation, container operations and flushes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A cell was created while an observer callback was running.
    ///
    /// Dependency bookkeeping assumes cells are created outside tracked
    /// execution, so this is rejected synchronously.
    #[error("observable cells must not be created inside a running observer")]
    InvalidMutationContext,

    /// The operation is not supported by the container's shape.
    #[error("expected a {expected} container, found a {found}")]
    ShapeMismatch {
        /// Shape the operation requires.
        expected: Shape,
        /// Shape of the container it was applied to.
        found: Shape,
    },

    /// The key kind cannot address a slot in this shape.
    #[error("key {key} is not valid for a {shape} container")]
    InvalidKey {
        /// The rejected key.
        key: Key,
        /// Shape of the container.
        shape: Shape,
    },

    /// A sequence write landed past the end of the sequence.
    #[error("index {index} out of bounds for sequence of length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Length at the time of the write.
        len: usize,
    },

    /// A container operation was applied to a scalar read result.
    #[error("value is not a container")]
    NotAContainer,

    /// An observer panicked during a flush with panic isolation enabled.
    #[error("observer {observer} panicked: {message}")]
    ObserverPanicked {
        /// The observer that failed.
        observer: ObserverId,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// `settle` kept producing new batches past the configured bound.
    #[error("state did not settle after {rounds} flush rounds")]
    SettleLimitExceeded {
        /// Number of flushes that ran.
        rounds: usize,
    },

    /// A mutation batch could not be encoded.
    #[error("failed to encode mutation batch: {0}")]
    Encode(String),

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Encode(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
