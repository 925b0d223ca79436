//! Error taxonomy for the data-IO layer.
//!
//! Every public API returns `anyhow::Result`; the concrete failure is always
//! one of the [`DataError`] variants below so callers can recover the kind
//! with `err.downcast_ref::<DataError>()`, even after `.context(..)` has been
//! attached further up the stack.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Bad, unknown or malformed key passed to `init`.
    #[error("Configuration error in {component}: {message}")]
    Config {
        component: String,
        message: String,
    },

    #[error("{component} was already initialized; construct a new instance instead")]
    AlreadyInitialized { component: String },

    #[error("{component} used before init()")]
    NotInitialized { component: String },

    /// `value()` called without a preceding successful `next()`.
    #[error("{component}: value() requires a preceding next() that returned true")]
    NoCurrentValue { component: String },

    #[error("{what} {index} out of bounds (size {size})")]
    OutOfBounds { what: String, index: u64, size: u64 },

    #[error("BatchifyFunction should handle at least 1 sample")]
    EmptyBatch,

    #[error("{sample}-th input size does not match {expected} (got {found})")]
    ArityMismatch {
        sample: usize,
        expected: usize,
        found: usize,
    },

    #[error("Shape mismatch in sample {sample} for field {field}: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        field: usize,
        sample: usize,
        expected: Vec<i64>,
        found: Vec<i64>,
    },

    #[error("Unknown {kind} '{name}' (registered: {available})")]
    NotFound {
        kind: String,
        name: String,
        available: String,
    },

    /// A batch claims more filler samples than it holds.
    #[error("padding count {num_batch_padd} exceeds batch size {batch_size}")]
    InvalidPadding {
        num_batch_padd: usize,
        batch_size: usize,
    },

    #[error("{kind} '{name}' is already registered")]
    DuplicateRegistration { kind: String, name: String },

    /// Failure inside a concrete data source (I/O, decoding, exhausted source).
    #[error("Data source error in {component}: {message}")]
    Source { component: String, message: String },
}

impl DataError {
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn already_initialized(component: impl Into<String>) -> Self {
        Self::AlreadyInitialized {
            component: component.into(),
        }
    }

    pub fn not_initialized(component: impl Into<String>) -> Self {
        Self::NotInitialized {
            component: component.into(),
        }
    }

    pub fn no_current_value(component: impl Into<String>) -> Self {
        Self::NoCurrentValue {
            component: component.into(),
        }
    }

    pub fn out_of_bounds(what: impl Into<String>, index: u64, size: u64) -> Self {
        Self::OutOfBounds {
            what: what.into(),
            index,
            size,
        }
    }

    pub fn source(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            component: component.into(),
            message: message.into(),
        }
    }

    /// True for errors that indicate a caller bug rather than bad data or config.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInitialized { .. }
                | Self::NotInitialized { .. }
                | Self::NoCurrentValue { .. }
                | Self::OutOfBounds { .. }
                | Self::EmptyBatch
                | Self::ArityMismatch { .. }
                | Self::ShapeMismatch { .. }
                | Self::InvalidPadding { .. }
        )
    }
}

/// Returns the [`DataError`] carried by `err`, if any.
pub fn data_error(err: &anyhow::Error) -> Option<&DataError> {
    err.downcast_ref::<DataError>()
}
