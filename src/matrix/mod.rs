//! Sparse matrix storage with deferred mutations
//!
//! A matrix lives in one of four physical layouts (hypersparse, sparse,
//! bitmap, full) and absorbs mutations without rewriting its bulk
//! storage: inserts land in a pending queue, deletions tombstone their
//! slot in place, and bulk loads may leave column runs unsorted. The
//! backlog drains all at once when a read forces reconciliation.
//!
//! # Architecture
//!
//! - **core**: the `Matrix` type, its layouts, and the mutation/read API
//! - **slot**: row-index slots with in-place tombstone encoding
//! - **pending**: the columnar queue of deferred writes
//! - **build**: unsorted tuples to clean compressed storage
//! - **merge**: three-phase union-merge of two compressed matrices
//! - **wait**: the reconciliation sequence (prune, sort, build, merge)
//! - **conform**: density-driven layout selection
//! - **view**: borrowed clean slices of compressed storage
//! - **par**: sequential-or-parallel task dispatch

mod build;
mod conform;
mod core;
mod merge;
mod par;
mod pending;
mod slot;
mod view;
mod wait;

pub use build::DupPolicy;
pub use self::core::{Matrix, Sparsity};
