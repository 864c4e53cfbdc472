//! Error taxonomy for matrix storage operations.
//!
//! Only two conditions are recoverable: allocation failure and the
//! unexpected-duplicate report from the tuple builder. Both leave the
//! affected matrix fully cleared, never partially reconciled. Structural
//! invariants (monotone column offsets, sorted runs) are checked with
//! `debug_assert!` and are not part of this taxonomy.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An internal buffer could not be grown. The matrix the operation was
    /// applied to has been emptied; the caller may retry after freeing
    /// memory elsewhere.
    #[error("out of memory: failed to reserve {bytes} bytes")]
    OutOfMemory { bytes: usize },

    /// The tuple builder was told to reject duplicates and found one.
    /// Reported distinctly from allocation failure.
    #[error("duplicate tuple at ({row}, {col})")]
    DuplicateTuple { row: u64, col: u64 },

    /// A coordinate lies outside the matrix dimensions.
    #[error("index ({row}, {col}) out of bounds for {nrows}x{ncols} matrix")]
    IndexOutOfBounds {
        row: u64,
        col: u64,
        nrows: u64,
        ncols: u64,
    },

    /// Two matrices passed to a binary operation have different shapes.
    #[error("dimension mismatch: {a_nrows}x{a_ncols} vs {b_nrows}x{b_ncols}")]
    DimensionMismatch {
        a_nrows: u64,
        a_ncols: u64,
        b_nrows: u64,
        b_ncols: u64,
    },

    /// Parallel input arrays to the tuple builder have different lengths.
    #[error("tuple arrays have mismatched lengths: {rows} rows, {cols} cols, {vals} values")]
    TupleLengthMismatch {
        rows: usize,
        cols: usize,
        vals: usize,
    },
}

/// Map a failed `try_reserve` to the crate error, recording how many bytes
/// the reservation would have needed.
pub(crate) fn oom_for<T>(extra: usize) -> Error {
    Error::OutOfMemory {
        bytes: extra.saturating_mul(std::mem::size_of::<T>().max(1)),
    }
}
