//! The matrix entity: storage layouts and the mutation/read surface.
//!
//! A matrix owns one of three physical layouts:
//!
//! - **Csc**: compressed-column storage, optionally hypersparse (an
//!   explicit occupied-column list instead of one offset per column).
//!   All deferred-mutation state lives here: the pending queue, the
//!   tombstone count, and the jumbled flag. Bitmap and full matrices
//!   never carry backlog, by construction.
//! - **Bitmap**: a roaring presence set over column-major positions plus
//!   a dense value buffer.
//! - **Full**: every coordinate present; just the value buffer.
//!
//! Mutations never touch the bulk Csc layout: they append to the pending
//! queue or tombstone a slot in place. Reads reconcile first, so backlog
//! state is invisible to callers.

use std::ops::Range;

use roaring::RoaringTreemap;

use crate::config::{Config, Mode};
use crate::error::{Error, Result};
use crate::ops::{CombineArc, Element, same_op};

use super::pending::PendingQueue;
use super::slot::Slot;
use super::{build, conform, wait};

/// Physical storage layout of a matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sparsity {
    Hypersparse,
    Sparse,
    Bitmap,
    Full,
}

/// Compressed-column storage with deferred-mutation state.
#[derive(Clone, Debug)]
pub(crate) struct Csc<T> {
    /// Occupied column ids, sorted ascending. `None` means plain sparse:
    /// one offset per column, `col_ptr.len() == ncols + 1`.
    pub col_list: Option<Vec<u64>>,
    /// Column start offsets; non-decreasing, final entry equals the
    /// occupied length of `rows`/`vals`.
    pub col_ptr: Vec<usize>,
    pub rows: Vec<Slot>,
    pub vals: Vec<T>,
    /// Entries tombstoned in place, awaiting physical removal.
    pub nzombies: usize,
    /// Live entries within some column run are not index-sorted.
    pub jumbled: bool,
    pub pending: Option<PendingQueue<T>>,
    /// Lazily cached count of columns with at least one physical entry.
    /// `None` means stale.
    pub nvec_nonempty: Option<usize>,
}

impl<T: Element> Csc<T> {
    /// An empty hypersparse matrix.
    pub fn empty() -> Self {
        Self {
            col_list: Some(Vec::new()),
            col_ptr: vec![0],
            rows: Vec::new(),
            vals: Vec::new(),
            nzombies: 0,
            jumbled: false,
            pending: None,
            nvec_nonempty: Some(0),
        }
    }

    /// Number of stored column groups (occupied columns when hypersparse,
    /// all columns when sparse).
    #[inline]
    pub fn nvec(&self) -> usize {
        self.col_ptr.len() - 1
    }

    /// Column id of group `k`.
    #[inline]
    pub fn col_id(&self, k: usize) -> u64 {
        match &self.col_list {
            Some(list) => list[k],
            None => k as u64,
        }
    }

    /// Group index holding column `j`, if stored.
    pub fn find_col(&self, j: u64) -> Option<usize> {
        match &self.col_list {
            Some(list) => list.binary_search(&j).ok(),
            None => (j < self.nvec() as u64).then_some(j as usize),
        }
    }

    /// Entry range of group `k`.
    #[inline]
    pub fn range(&self, k: usize) -> Range<usize> {
        self.col_ptr[k]..self.col_ptr[k + 1]
    }

    pub fn has_backlog(&self) -> bool {
        self.pending.is_some() || self.nzombies > 0 || self.jumbled
    }

    /// Recount columns that hold at least one physical entry.
    pub fn nvec_nonempty(&mut self) -> usize {
        if let Some(n) = self.nvec_nonempty {
            return n;
        }
        let n = (0..self.nvec())
            .filter(|&k| self.col_ptr[k + 1] > self.col_ptr[k])
            .count();
        self.nvec_nonempty = Some(n);
        n
    }

    /// Lookup of a live entry; requires sorted runs (not jumbled).
    pub fn get(&self, row: u64, col: u64) -> Option<&T> {
        debug_assert!(!self.jumbled);
        let k = self.find_col(col)?;
        let r = self.range(k);
        let run = &self.rows[r.clone()];
        let at = run.partition_point(|s| s.index() < row);
        if at < run.len() && run[at].index() == row && !run[at].is_dead() {
            Some(&self.vals[r.start + at])
        } else {
            None
        }
    }

    /// Tombstone the live entry at (row, col). Returns whether an entry
    /// was killed.
    pub fn kill_entry(&mut self, row: u64, col: u64) -> bool {
        debug_assert!(!self.jumbled && self.pending.is_none());
        let Some(k) = self.find_col(col) else {
            return false;
        };
        let r = self.range(k);
        let run = &mut self.rows[r];
        let at = run.partition_point(|s| s.index() < row);
        if at < run.len() && run[at].index() == row && !run[at].is_dead() {
            run[at].kill();
            self.nzombies += 1;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub(crate) enum Store<T> {
    Csc(Csc<T>),
    Bitmap {
        present: RoaringTreemap,
        vals: Vec<T>,
    },
    Full {
        vals: Vec<T>,
    },
}

/// A sparse matrix with deferred mutations.
///
/// Exclusively owned by its caller; no internal locking. Reconciliation
/// and merging may run data-parallel loops internally, but a single call
/// blocks until it completes or fails.
#[derive(Clone)]
pub struct Matrix<T> {
    pub(crate) nrows: u64,
    pub(crate) ncols: u64,
    pub(crate) store: Store<T>,
    pub(crate) config: Config,
}

impl<T: Element> Matrix<T> {
    /// An empty `nrows x ncols` matrix in hypersparse layout.
    pub fn new(nrows: u64, ncols: u64) -> Self {
        Self::with_config(nrows, ncols, Config::default())
    }

    pub fn with_config(nrows: u64, ncols: u64, config: Config) -> Self {
        Self {
            nrows,
            ncols,
            store: Store::Csc(Csc::empty()),
            config,
        }
    }

    /// Build a matrix from raw (row, col, value) tuples; see
    /// [`build::matrix_from_tuples`] for duplicate handling.
    pub fn from_tuples(
        nrows: u64,
        ncols: u64,
        rows: Vec<u64>,
        cols: Vec<u64>,
        vals: Vec<T>,
        dup: build::DupPolicy<'_, T>,
    ) -> Result<Self> {
        build::matrix_from_tuples(nrows, ncols, rows, cols, vals, dup)
    }

    /// Adopt pre-built sparse CSC arrays. `col_ptr` has one offset per
    /// column plus a final total; `sorted == false` marks the matrix
    /// jumbled so the next reconciliation sorts each column run.
    ///
    /// Structural invariants (monotone offsets, in-bounds rows) are
    /// checked under debug assertions only.
    pub fn from_csc(
        nrows: u64,
        ncols: u64,
        col_ptr: Vec<usize>,
        row_indices: Vec<u64>,
        vals: Vec<T>,
        sorted: bool,
    ) -> Self {
        debug_assert_eq!(col_ptr.len(), ncols as usize + 1);
        debug_assert_eq!(row_indices.len(), vals.len());
        debug_assert_eq!(*col_ptr.last().unwrap_or(&0), row_indices.len());
        debug_assert!(col_ptr.windows(2).all(|w| w[0] <= w[1]));
        debug_assert!(row_indices.iter().all(|&r| r < nrows));
        let rows = row_indices.into_iter().map(Slot::live).collect();
        Self {
            nrows,
            ncols,
            store: Store::Csc(Csc {
                col_list: None,
                col_ptr,
                rows,
                vals,
                nzombies: 0,
                jumbled: !sorted,
                pending: None,
                nvec_nonempty: None,
            }),
            config: Config::default(),
        }
    }

    #[inline]
    pub fn nrows(&self) -> u64 {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> u64 {
        self.ncols
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Current physical layout.
    pub fn sparsity(&self) -> Sparsity {
        match &self.store {
            Store::Csc(c) if c.col_list.is_some() => Sparsity::Hypersparse,
            Store::Csc(_) => Sparsity::Sparse,
            Store::Bitmap { .. } => Sparsity::Bitmap,
            Store::Full { .. } => Sparsity::Full,
        }
    }

    /// True when no pending tuples, tombstones, or jumbled runs exist.
    pub fn is_reconciled(&self) -> bool {
        match &self.store {
            Store::Csc(c) => !c.has_backlog(),
            _ => true,
        }
    }

    /// Eliminate all backlog and restore a canonical layout.
    ///
    /// On failure the matrix is left fully cleared (logically empty),
    /// never partially reconciled.
    pub fn reconcile(&mut self) -> Result<()> {
        wait::wait_matrix(self)
    }

    /// Drop all content and backlog; dimensions and config survive.
    pub fn clear(&mut self) {
        self.store = Store::Csc(Csc::empty());
    }

    /// Set `(row, col)` to `val`, overwriting any existing value
    /// (keep-last semantics). Deferred for compressed layouts.
    pub fn set(&mut self, row: u64, col: u64, val: T) -> Result<()> {
        self.check_bounds(row, col)?;
        let nrows = self.nrows;
        match &mut self.store {
            Store::Full { vals } => {
                vals[(col * nrows + row) as usize] = val;
                return Ok(());
            }
            Store::Bitmap { present, vals } => {
                let p = col * nrows + row;
                vals[p as usize] = val;
                present.insert(p);
                return Ok(());
            }
            Store::Csc(_) => {}
        }
        if let Err(e) = self.enqueue(row, col, val, None) {
            self.clear();
            return Err(e);
        }
        self.after_mutation()
    }

    /// Combine `val` into `(row, col)` through `op` (accumulate
    /// semantics): if an entry exists the reconciled value is
    /// `op(existing, val)`; otherwise `val` is inserted.
    pub fn update(&mut self, row: u64, col: u64, val: T, op: CombineArc<T>) -> Result<()> {
        self.check_bounds(row, col)?;
        let nrows = self.nrows;
        match &mut self.store {
            Store::Full { vals } => {
                let p = (col * nrows + row) as usize;
                vals[p] = op.combine(&vals[p], &val);
                return Ok(());
            }
            Store::Bitmap { present, vals } => {
                let p = col * nrows + row;
                let i = p as usize;
                if present.contains(p) {
                    vals[i] = op.combine(&vals[i], &val);
                } else {
                    vals[i] = val;
                    present.insert(p);
                }
                return Ok(());
            }
            Store::Csc(_) => {}
        }
        if let Err(e) = self.enqueue(row, col, val, Some(op)) {
            self.clear();
            return Err(e);
        }
        self.after_mutation()
    }

    /// Logically delete `(row, col)`. Compressed layouts tombstone the
    /// slot in place; physical removal happens at reconciliation.
    /// Returns whether an entry existed.
    pub fn remove(&mut self, row: u64, col: u64) -> Result<bool> {
        self.check_bounds(row, col)?;
        // Deleting through a queued backlog or unsorted runs would race
        // the tuples still in flight; reconcile those away first.
        if let Store::Csc(c) = &self.store
            && (c.pending.is_some() || c.jumbled)
        {
            self.reconcile()?;
        }
        if matches!(self.store, Store::Full { .. }) {
            conform::full_into_bitmap(self);
        }
        let nrows = self.nrows;
        match &mut self.store {
            Store::Bitmap { present, .. } => Ok(present.remove(col * nrows + row)),
            Store::Csc(c) => {
                let killed = c.kill_entry(row, col);
                if killed {
                    c.nvec_nonempty = None;
                }
                Ok(killed)
            }
            Store::Full { .. } => unreachable!("full converted to bitmap above"),
        }
    }

    /// Value at `(row, col)`, reconciling first.
    pub fn get(&mut self, row: u64, col: u64) -> Result<Option<T>> {
        self.check_bounds(row, col)?;
        self.reconcile()?;
        let nrows = self.nrows;
        Ok(match &self.store {
            Store::Full { vals } => Some(vals[(col * nrows + row) as usize].clone()),
            Store::Bitmap { present, vals } => {
                let p = col * nrows + row;
                present.contains(p).then(|| vals[p as usize].clone())
            }
            Store::Csc(c) => c.get(row, col).cloned(),
        })
    }

    /// Logical entry count, reconciling first.
    pub fn nvals(&mut self) -> Result<u64> {
        self.reconcile()?;
        Ok(self.store_nvals())
    }

    /// Iterate live entries in `(col, row)` order, reconciling first.
    /// The matrix stays borrowed for the iterator's lifetime.
    pub fn iter(&mut self) -> Result<Box<dyn Iterator<Item = (u64, u64, &T)> + '_>> {
        self.reconcile()?;
        let nrows = self.nrows;
        let ncols = self.ncols;
        Ok(match &self.store {
            Store::Csc(c) => Box::new((0..c.nvec()).flat_map(move |k| {
                let j = c.col_id(k);
                c.range(k).map(move |r| {
                    debug_assert!(!c.rows[r].is_dead());
                    (c.rows[r].index(), j, &c.vals[r])
                })
            })),
            Store::Bitmap { present, vals } => Box::new(
                present
                    .iter()
                    .map(move |p| (p % nrows, p / nrows, &vals[p as usize])),
            ),
            Store::Full { vals } => Box::new((0..ncols).flat_map(move |col| {
                (0..nrows).map(move |row| (row, col, &vals[(col * nrows + row) as usize]))
            })),
        })
    }

    /// Extract all entries as parallel arrays in `(col, row)` order,
    /// reconciling first.
    pub fn to_tuples(&mut self) -> Result<(Vec<u64>, Vec<u64>, Vec<T>)> {
        self.reconcile()?;
        let n = self.store_nvals() as usize;
        let mut rows = Vec::with_capacity(n);
        let mut cols = Vec::with_capacity(n);
        let mut vals = Vec::with_capacity(n);
        for (r, c, v) in self.iter()? {
            rows.push(r);
            cols.push(c);
            vals.push(v.clone());
        }
        Ok((rows, cols, vals))
    }

    // ------------------------------------------------------------------
    // Internals shared with the sibling modules
    // ------------------------------------------------------------------

    pub(crate) fn store_nvals(&self) -> u64 {
        match &self.store {
            Store::Csc(c) => {
                debug_assert!(c.pending.is_none());
                (c.rows.len() - c.nzombies) as u64
            }
            Store::Bitmap { present, .. } => present.len(),
            Store::Full { .. } => self.nrows * self.ncols,
        }
    }

    fn check_bounds(&self, row: u64, col: u64) -> Result<()> {
        if row < self.nrows && col < self.ncols {
            Ok(())
        } else {
            Err(Error::IndexOutOfBounds {
                row,
                col,
                nrows: self.nrows,
                ncols: self.ncols,
            })
        }
    }

    /// Append one tuple to the pending queue, creating it on first use.
    /// A queue carries exactly one combining operator: switching
    /// operators (or appending to a poisoned queue) reconciles first.
    fn enqueue(&mut self, row: u64, col: u64, val: T, op: Option<CombineArc<T>>) -> Result<()> {
        let must_wait = match &self.store {
            Store::Csc(c) => c
                .pending
                .as_ref()
                .is_some_and(|q| q.is_poisoned() || !same_op(q.op(), op.as_ref())),
            _ => false,
        };
        if must_wait {
            self.reconcile()?;
        }
        let single_col = self.ncols <= 1;
        match &mut self.store {
            Store::Csc(c) => {
                let q = c
                    .pending
                    .get_or_insert_with(|| PendingQueue::new(single_col, op));
                q.ensure(1)?;
                q.append(row, col, val);
                Ok(())
            }
            // Reconciliation can only densify; a mutation that began on a
            // compressed layout re-dispatches through set/update if so.
            Store::Bitmap { present, vals } => {
                let p = col * self.nrows + row;
                let i = p as usize;
                if present.contains(p) && let Some(op) = &op {
                    vals[i] = op.combine(&vals[i], &val);
                } else {
                    vals[i] = val;
                    present.insert(p);
                }
                Ok(())
            }
            Store::Full { vals } => {
                let i = (col * self.nrows + row) as usize;
                if let Some(op) = &op {
                    vals[i] = op.combine(&vals[i], &val);
                } else {
                    vals[i] = val;
                }
                Ok(())
            }
        }
    }

    fn after_mutation(&mut self) -> Result<()> {
        let flush = match (self.config.mode, &self.store) {
            (Mode::Blocking, _) => true,
            (Mode::NonBlocking, Store::Csc(c)) => c
                .pending
                .as_ref()
                .is_some_and(|q| q.len() > self.config.pending_limit(self.nrows, self.ncols)),
            _ => false,
        };
        if flush { self.reconcile() } else { Ok(()) }
    }
}

impl<T: Element> std::fmt::Debug for Matrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backlog = match &self.store {
            Store::Csc(c) => (
                c.pending.as_ref().map_or(0, |q| q.len()),
                c.nzombies,
                c.jumbled,
            ),
            _ => (0, 0, false),
        };
        f.debug_struct("Matrix")
            .field("nrows", &self.nrows)
            .field("ncols", &self.ncols)
            .field("sparsity", &self.sparsity())
            .field("pending", &backlog.0)
            .field("zombies", &backlog.1)
            .field("jumbled", &backlog.2)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_matrix_is_empty_hypersparse() {
        let mut m: Matrix<u64> = Matrix::new(10, 10);
        assert_eq!(m.sparsity(), Sparsity::Hypersparse);
        assert_eq!(m.nvals().unwrap(), 0);
        assert!(m.is_reconciled());
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut m: Matrix<u64> = Matrix::new(8, 8);
        m.set(3, 2, 7).unwrap();
        assert!(!m.is_reconciled());
        assert_eq!(m.get(3, 2).unwrap(), Some(7));
        assert!(m.is_reconciled());
        assert_eq!(m.get(2, 3).unwrap(), None);
    }

    #[test]
    fn test_out_of_bounds_is_rejected() {
        let mut m: Matrix<u64> = Matrix::new(4, 4);
        assert!(matches!(
            m.set(4, 0, 1),
            Err(Error::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            m.get(0, 9),
            Err(Error::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_overwrite_keeps_last() {
        let mut m: Matrix<u64> = Matrix::new(4, 4);
        m.set(1, 1, 5).unwrap();
        m.set(1, 1, 6).unwrap();
        assert_eq!(m.get(1, 1).unwrap(), Some(6));
        assert_eq!(m.nvals().unwrap(), 1);
    }

    #[test]
    fn test_remove_then_lookup() {
        let mut m: Matrix<u64> = Matrix::new(4, 4);
        m.set(2, 0, 9).unwrap();
        assert_eq!(m.get(2, 0).unwrap(), Some(9));
        assert!(m.remove(2, 0).unwrap());
        assert_eq!(m.get(2, 0).unwrap(), None);
        assert!(!m.remove(2, 0).unwrap());
    }

    #[test]
    fn test_from_csc_jumbled_flag() {
        // col 0: rows 5, 1 (unsorted)
        let m = Matrix::from_csc(6, 2, vec![0, 2, 2], vec![5, 1], vec![50u64, 10], false);
        assert!(!m.is_reconciled());
        let mut m = m;
        assert_eq!(m.get(1, 0).unwrap(), Some(10));
        assert_eq!(m.get(5, 0).unwrap(), Some(50));
    }
}
