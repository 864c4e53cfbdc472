//! Physical-layout conformance: pick the cheapest format for the data.
//!
//! After reconciliation (and after every merge) the matrix re-settles
//! into one of the four layouts based on density and the config
//! switch-points: completely dense data goes full, density above the
//! bitmap switch goes bitmap, everything else stays compressed, with the
//! occupied-column count deciding hypersparse versus plain sparse.
//!
//! Dense layouts index by column-major position `p = col * nrows + row`,
//! so they exist only when the full volume fits in `usize`. Matrices too
//! large for that stay compressed no matter the density.

use std::mem;

use roaring::RoaringTreemap;
use tracing::debug;

use crate::error::{Result, oom_for};
use crate::ops::Element;

use super::core::{Csc, Matrix, Sparsity, Store};
use super::slot::Slot;

/// Re-settle `m` into the layout its density calls for. Expects a
/// reconciled matrix.
pub(crate) fn conform<T: Element>(m: &mut Matrix<T>) -> Result<()> {
    debug_assert!(m.is_reconciled());
    let nvals = m.store_nvals();
    let vol = m.nrows.checked_mul(m.ncols);
    let fits = vol.is_some_and(|v| usize::try_from(v).is_ok());
    let want_dense = match vol {
        Some(v) if fits && v > 0 && nvals == v => Some(Sparsity::Full),
        Some(v) if fits && v > 0 && (nvals as f64) > m.config.bitmap_switch * (v as f64) => {
            Some(Sparsity::Bitmap)
        }
        _ => None,
    };
    match want_dense {
        Some(Sparsity::Full) => to_full(m)?,
        Some(Sparsity::Bitmap) => to_bitmap(m)?,
        _ => {
            to_csc(m)?;
            shape_csc(m)?;
        }
    }
    debug!(nvals, sparsity = ?m.sparsity(), "conformed");
    Ok(())
}

fn to_full<T: Element>(m: &mut Matrix<T>) -> Result<()> {
    let nrows = m.nrows;
    let vol = (nrows * m.ncols) as usize;
    let vals = match &mut m.store {
        Store::Full { .. } => return Ok(()),
        Store::Bitmap { present, vals } => {
            debug_assert_eq!(present.len() as usize, vol);
            mem::take(vals)
        }
        Store::Csc(c) => {
            debug_assert_eq!(c.rows.len(), vol);
            let mut vals: Vec<T> = Vec::new();
            vals.try_reserve(vol).map_err(|_| oom_for::<T>(vol))?;
            vals.resize(vol, T::default());
            for k in 0..c.nvec() {
                let j = c.col_id(k);
                for r in c.range(k) {
                    vals[(j * nrows + c.rows[r].index()) as usize] = c.vals[r].clone();
                }
            }
            vals
        }
    };
    m.store = Store::Full { vals };
    Ok(())
}

fn to_bitmap<T: Element>(m: &mut Matrix<T>) -> Result<()> {
    let nrows = m.nrows;
    let vol = (nrows * m.ncols) as usize;
    let c = match &m.store {
        Store::Bitmap { .. } => return Ok(()),
        Store::Full { .. } => {
            full_into_bitmap(m);
            return Ok(());
        }
        Store::Csc(c) => c,
    };
    let mut vals: Vec<T> = Vec::new();
    vals.try_reserve(vol).map_err(|_| oom_for::<T>(vol))?;
    vals.resize(vol, T::default());
    let mut present = RoaringTreemap::new();
    for k in 0..c.nvec() {
        let j = c.col_id(k);
        for r in c.range(k) {
            debug_assert!(!c.rows[r].is_dead());
            let p = j * nrows + c.rows[r].index();
            present.insert(p);
            vals[p as usize] = c.vals[r].clone();
        }
    }
    m.store = Store::Bitmap { present, vals };
    Ok(())
}

fn to_csc<T: Element>(m: &mut Matrix<T>) -> Result<()> {
    if matches!(m.store, Store::Csc(_)) {
        return Ok(());
    }
    let csc = csc_snapshot(m)?;
    m.store = Store::Csc(csc);
    Ok(())
}

/// Every coordinate becomes present; values are kept as-is. Used by
/// deletion on a full matrix, which needs somewhere to record absence.
pub(crate) fn full_into_bitmap<T: Element>(m: &mut Matrix<T>) {
    let vol = m.nrows * m.ncols;
    if let Store::Full { vals } = &mut m.store {
        let vals = mem::take(vals);
        let mut present = RoaringTreemap::new();
        present.insert_range(0..vol);
        m.store = Store::Bitmap { present, vals };
    }
}

/// A compressed (hypersparse) copy of any layout, leaving `m` untouched.
pub(crate) fn csc_snapshot<T: Element>(m: &Matrix<T>) -> Result<Csc<T>> {
    let nrows = m.nrows;
    match &m.store {
        Store::Csc(c) => Ok(c.clone()),
        Store::Bitmap { present, vals } => {
            let n = present.len() as usize;
            build_from_positions(nrows, n, present.iter(), |p| vals[p as usize].clone())
        }
        Store::Full { vals } => {
            let vol = nrows * m.ncols;
            build_from_positions(nrows, vol as usize, 0..vol, |p| vals[p as usize].clone())
        }
    }
}

/// Assemble hypersparse storage from ascending column-major positions.
fn build_from_positions<T: Element>(
    nrows: u64,
    n: usize,
    positions: impl Iterator<Item = u64>,
    value_at: impl Fn(u64) -> T,
) -> Result<Csc<T>> {
    let mut col_list: Vec<u64> = Vec::new();
    let mut col_ptr: Vec<usize> = vec![0];
    let mut rows: Vec<Slot> = Vec::new();
    let mut vals: Vec<T> = Vec::new();
    rows.try_reserve(n).map_err(|_| oom_for::<Slot>(n))?;
    vals.try_reserve(n).map_err(|_| oom_for::<T>(n))?;
    for p in positions {
        let (col, row) = (p / nrows, p % nrows);
        if col_list.last() != Some(&col) {
            if !col_list.is_empty() {
                col_ptr.push(rows.len());
            }
            col_list.push(col);
        }
        rows.push(Slot::live(row));
        vals.push(value_at(p));
    }
    if !col_list.is_empty() {
        col_ptr.push(rows.len());
    }
    let nvec = col_list.len();
    Ok(Csc {
        col_list: Some(col_list),
        col_ptr,
        rows,
        vals,
        nzombies: 0,
        jumbled: false,
        pending: None,
        nvec_nonempty: Some(nvec),
    })
}

/// Choose hypersparse versus plain sparse for a compressed matrix.
fn shape_csc<T: Element>(m: &mut Matrix<T>) -> Result<()> {
    let ncols = m.ncols;
    let hyper_switch = m.config.hyper_switch;
    let Store::Csc(c) = &mut m.store else {
        unreachable!()
    };
    let occupied = c.nvec_nonempty();
    let want_hyper = (occupied as f64) <= hyper_switch * ncols as f64;
    match (want_hyper, c.col_list.is_some()) {
        (true, false) => {
            compact_to_hyper(c);
            Ok(())
        }
        (false, true) => hyper_to_sparse(c, ncols),
        _ => Ok(()),
    }
}

/// Keep only the non-empty column groups and list them explicitly.
fn compact_to_hyper<T: Element>(c: &mut Csc<T>) {
    let nvec = c.nvec();
    let mut col_list: Vec<u64> = Vec::with_capacity(c.nvec_nonempty());
    let mut col_ptr: Vec<usize> = Vec::with_capacity(col_list.capacity() + 1);
    col_ptr.push(0);
    for k in 0..nvec {
        let (s, e) = (c.col_ptr[k], c.col_ptr[k + 1]);
        if e > s {
            col_list.push(c.col_id(k));
            col_ptr.push(e);
        }
    }
    let n = col_list.len();
    c.col_list = Some(col_list);
    c.col_ptr = col_ptr;
    c.nvec_nonempty = Some(n);
}

/// One offset per column. Skipped (harmlessly staying hypersparse) when
/// the column count itself cannot be addressed.
fn hyper_to_sparse<T: Element>(c: &mut Csc<T>, ncols: u64) -> Result<()> {
    let Ok(n) = usize::try_from(ncols) else {
        return Ok(());
    };
    let Some(list) = c.col_list.take() else {
        return Ok(());
    };
    let old_ptr = mem::take(&mut c.col_ptr);
    let mut col_ptr: Vec<usize> = Vec::new();
    if let Err(e) = col_ptr.try_reserve(n + 1).map_err(|_| oom_for::<usize>(n + 1)) {
        // roll back so the matrix stays structurally valid
        c.col_list = Some(list);
        c.col_ptr = old_ptr;
        return Err(e);
    }
    col_ptr.push(0);
    let mut k = 0;
    let mut end = 0;
    for j in 0..ncols {
        if k < list.len() && list[k] == j {
            end = old_ptr[k + 1];
            k += 1;
        }
        col_ptr.push(end);
    }
    c.col_ptr = col_ptr;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::build::DupPolicy;

    fn mat(nrows: u64, ncols: u64, tuples: &[(u64, u64, u64)]) -> Matrix<u64> {
        let rows = tuples.iter().map(|t| t.0).collect();
        let cols = tuples.iter().map(|t| t.1).collect();
        let vals = tuples.iter().map(|t| t.2).collect();
        Matrix::from_tuples(nrows, ncols, rows, cols, vals, DupPolicy::Reject).unwrap()
    }

    #[test]
    fn test_dense_data_goes_full() {
        let mut m = mat(2, 2, &[(0, 0, 1), (1, 0, 2), (0, 1, 3), (1, 1, 4)]);
        m.reconcile().unwrap();
        assert_eq!(m.sparsity(), Sparsity::Full);
        assert_eq!(m.get(1, 1).unwrap(), Some(4));
    }

    #[test]
    fn test_moderate_density_goes_bitmap() {
        // 5 of 16 = 31% > 10%
        let mut m = mat(4, 4, &[(0, 0, 1), (1, 1, 2), (2, 2, 3), (3, 3, 4), (0, 3, 5)]);
        m.reconcile().unwrap();
        assert_eq!(m.sparsity(), Sparsity::Bitmap);
        assert_eq!(m.nvals().unwrap(), 5);
        assert_eq!(m.get(0, 3).unwrap(), Some(5));
    }

    #[test]
    fn test_low_density_stays_compressed() {
        let mut m = mat(100, 100, &[(5, 5, 1), (50, 5, 2)]);
        m.reconcile().unwrap();
        assert_eq!(m.sparsity(), Sparsity::Hypersparse);
    }

    #[test]
    fn test_many_occupied_columns_goes_sparse() {
        // 8 of 16 columns occupied, well over the 6.25% hyper switch,
        // but 8 of 256 cells is under the bitmap switch
        let tuples: Vec<(u64, u64, u64)> = (0..8).map(|j| (j, 2 * j, j)).collect();
        let mut m = mat(16, 16, &tuples);
        m.reconcile().unwrap();
        assert_eq!(m.sparsity(), Sparsity::Sparse);
        for j in 0..8 {
            assert_eq!(m.get(j, 2 * j).unwrap(), Some(j));
        }
    }

    #[test]
    fn test_deletion_sparsifies_a_bitmap() {
        let mut m = mat(4, 4, &[(0, 0, 1), (1, 1, 2), (2, 2, 3), (3, 3, 4), (0, 3, 5)]);
        m.reconcile().unwrap();
        assert_eq!(m.sparsity(), Sparsity::Bitmap);
        for (r, c) in [(1, 1), (2, 2), (3, 3), (0, 3)] {
            assert!(m.remove(r, c).unwrap());
        }
        m.reconcile().unwrap();
        assert_ne!(m.sparsity(), Sparsity::Bitmap);
        assert_eq!(m.get(0, 0).unwrap(), Some(1));
        assert_eq!(m.nvals().unwrap(), 1);
    }

    #[test]
    fn test_remove_from_full_goes_through_bitmap() {
        let mut m = mat(2, 2, &[(0, 0, 1), (1, 0, 2), (0, 1, 3), (1, 1, 4)]);
        m.reconcile().unwrap();
        assert_eq!(m.sparsity(), Sparsity::Full);
        assert!(m.remove(0, 1).unwrap());
        assert_eq!(m.sparsity(), Sparsity::Bitmap);
        assert_eq!(m.get(0, 1).unwrap(), None);
        assert_eq!(m.nvals().unwrap(), 3);
    }
}
