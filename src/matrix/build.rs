//! The tuple builder: unsorted (row, col, value) triples to clean
//! hypersparse CSC.
//!
//! Both bulk construction ([`Matrix::from_tuples`]) and reconciliation of
//! a pending queue funnel through [`build_csc`]. The sort is a stable
//! permutation over `(col, row)`, so equal coordinates keep their input
//! order and the duplicate fold sees values oldest-first. Output is
//! always hypersparse; format conformance is a separate, later step.

use rayon::slice::ParallelSliceMut;

use crate::config::Config;
use crate::error::{Error, Result, oom_for};
use crate::ops::{Combine, Element};

use super::core::{Csc, Matrix};
use super::slot::Slot;

/// What to do when two input tuples share a coordinate.
pub enum DupPolicy<'a, T> {
    /// Fold duplicates left-to-right through the operator:
    /// `op(op(v1, v2), v3)` in input order.
    Combine(&'a dyn Combine<T>),
    /// The last tuple in input order wins.
    KeepLast,
    /// Duplicates are an input error.
    Reject,
}

/// Sort, deduplicate, and compress raw tuples. `cols == None` means a
/// single-column input (every column id is zero). `sorted` asserts the
/// input is already `(col, row)` non-decreasing and skips the sort.
pub(crate) fn build_csc<T: Element>(
    nrows: u64,
    ncols: u64,
    rows: Vec<u64>,
    cols: Option<Vec<u64>>,
    vals: Vec<T>,
    sorted: bool,
    dup: DupPolicy<'_, T>,
    cfg: &Config,
) -> Result<Csc<T>> {
    let n = rows.len();
    if vals.len() != n || cols.as_ref().is_some_and(|c| c.len() != n) {
        return Err(Error::TupleLengthMismatch {
            rows: n,
            cols: cols.as_ref().map_or(n, Vec::len),
            vals: vals.len(),
        });
    }
    let col_of = |i: usize| cols.as_ref().map_or(0, |c| c[i]);
    for i in 0..n {
        if rows[i] >= nrows || col_of(i) >= ncols {
            return Err(Error::IndexOutOfBounds {
                row: rows[i],
                col: col_of(i),
                nrows,
                ncols,
            });
        }
    }

    // Stable permutation sort; identity when the producer kept order.
    let mut perm: Vec<usize> = Vec::new();
    perm.try_reserve(n).map_err(|_| oom_for::<usize>(n))?;
    perm.extend(0..n);
    if !sorted {
        // both sorts are stable, preserving position-of-origin on ties
        if cfg.nthreads_for(n) > 1 {
            perm.par_sort_by_key(|&i| (col_of(i), rows[i]));
        } else {
            perm.sort_by_key(|&i| (col_of(i), rows[i]));
        }
    }
    debug_assert!(
        perm.windows(2)
            .all(|w| (col_of(w[0]), rows[w[0]]) <= (col_of(w[1]), rows[w[1]]))
    );

    let mut col_list: Vec<u64> = Vec::new();
    let mut col_ptr: Vec<usize> = Vec::new();
    let mut out_rows: Vec<Slot> = Vec::new();
    let mut out_vals: Vec<T> = Vec::new();
    col_list.try_reserve(n).map_err(|_| oom_for::<u64>(n))?;
    col_ptr
        .try_reserve(n + 1)
        .map_err(|_| oom_for::<usize>(n + 1))?;
    out_rows.try_reserve(n).map_err(|_| oom_for::<Slot>(n))?;
    out_vals.try_reserve(n).map_err(|_| oom_for::<T>(n))?;
    col_ptr.push(0);

    let mut last: Option<(u64, u64)> = None;
    for &i in &perm {
        let (row, col, val) = (rows[i], col_of(i), &vals[i]);
        if last == Some((col, row))
            && let Some(slot) = out_vals.last_mut()
        {
            match dup {
                DupPolicy::Combine(op) => *slot = op.combine(slot, val),
                DupPolicy::KeepLast => *slot = val.clone(),
                DupPolicy::Reject => return Err(Error::DuplicateTuple { row, col }),
            }
            continue;
        }
        if last.map(|(c, _)| c) != Some(col) {
            if last.is_some() {
                col_ptr.push(out_rows.len());
            }
            col_list.push(col);
        }
        out_rows.push(Slot::live(row));
        out_vals.push(val.clone());
        last = Some((col, row));
    }
    if last.is_some() {
        col_ptr.push(out_rows.len());
    }

    let nvec = col_list.len();
    Ok(Csc {
        col_list: Some(col_list),
        col_ptr,
        rows: out_rows,
        vals: out_vals,
        nzombies: 0,
        jumbled: false,
        pending: None,
        nvec_nonempty: Some(nvec),
    })
}

/// Bulk-load entry point behind [`Matrix::from_tuples`].
pub(crate) fn matrix_from_tuples<T: Element>(
    nrows: u64,
    ncols: u64,
    rows: Vec<u64>,
    cols: Vec<u64>,
    vals: Vec<T>,
    dup: DupPolicy<'_, T>,
) -> Result<Matrix<T>> {
    let config = Config::default();
    let csc = build_csc(nrows, ncols, rows, Some(cols), vals, false, dup, &config)?;
    Ok(Matrix {
        nrows,
        ncols,
        store: super::core::Store::Csc(csc),
        config,
    })
}
