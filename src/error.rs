use std::io;

use snafu::Snafu;

/// Error raised by any of the storage layers.
///
/// The variants are deliberately coarse: they describe the *kind* of failure
/// rather than the component it came from, so callers can match on a small,
/// stable surface. Every fallible operation in the crate funnels into this
/// type; nothing is logged and nothing is swallowed along the way.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A general I/O error occurred.
    ///
    /// Underlying file, path, or OS failures all surface here, including
    /// exhausting available storage during file growth and failure to
    /// acquire the advisory dataset lock.
    #[snafu(display("I/O error during {operation}: {source}"))]
    Io {
        operation: &'static str,
        source: io::Error,
    },

    /// An on-disk invariant was violated.
    ///
    /// Raised when opening a dataset whose counters disagree (a torn append
    /// left `archived` behind `provisioned`), when the string heap cursor is
    /// unreadable, or when heap bytes fail UTF-8 decoding.
    #[snafu(display("corrupt dataset: {reason}"))]
    Corruption { reason: String },

    /// A read index fell outside the archived range.
    #[snafu(display("index {index} out of range for {archived} archived records"))]
    OutOfRange { index: usize, archived: usize },

    /// A schema rule was violated.
    ///
    /// Unknown field names, a fixed-size byte array without a declared
    /// length, or a payload longer than its declared fixed length.
    #[snafu(display("schema violation: {reason}"))]
    Schema { reason: String },

    /// A value had the wrong type for its field in the dynamic bucket.
    #[snafu(display("field '{field}' expects {expected}, got {actual}"))]
    Type {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The referenced partition does not exist.
    #[snafu(display("partition '{key}' not found"))]
    NotFound { key: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
