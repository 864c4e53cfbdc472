//! Deltamat: compressed sparse matrices with deferred mutations
//!
//! Point mutations on compressed storage are O(nnz) if applied eagerly,
//! so this crate never applies them eagerly: inserts queue up as pending
//! tuples, deletions tombstone entries in place, and the whole backlog
//! reconciles in one sorted merge when a read needs the answer. The
//! physical layout (hypersparse, sparse, bitmap, or full) re-settles
//! after each reconciliation based on density.

pub mod config;
pub mod error;
mod matrix;
pub mod ops;

pub use config::{Config, Mode};
pub use error::{Error, Result};
pub use matrix::{DupPolicy, Matrix, Sparsity};
pub use ops::{Combine, CombineArc, Element, Plus, Second};
