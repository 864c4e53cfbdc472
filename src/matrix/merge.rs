//! Union-merge of two compressed matrices.
//!
//! The workhorse behind both the public [`Matrix::union`] operation and
//! the remerge step of reconciliation. Three phases over the union of the
//! occupied columns of both inputs:
//!
//! 1. **locate**: pair up each union column with its entry ranges in the
//!    two inputs (and the mask), one task per column;
//! 2. **count**: per-task two-pointer walk counting the output run
//!    length, then a prefix sum over the counts fixes every column's
//!    output offset;
//! 3. **populate**: per-task walk again, writing rows and values into
//!    that column's disjoint output chunk.
//!
//! Count and populate parallelize across tasks; the prefix sum between
//! them is the only serial barrier. Where both inputs hold a coordinate,
//! the value is `op(left, right)`; with no operator the right value wins.
//! An optional structural mask restricts output coordinates to the mask's
//! pattern; mask values are never read.

use std::mem;
use std::ops::Range;

use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result, oom_for};
use crate::ops::{Combine, Element};

use super::core::{Csc, Matrix, Store};
use super::par::{for_each_task, prefix_sum};
use super::slot::Slot;
use super::view::CscView;
use super::{conform, wait};

/// The pattern of a clean compressed matrix, borrowed for masking.
#[derive(Clone, Copy)]
pub(crate) struct MaskView<'a> {
    col_list: Option<&'a [u64]>,
    col_ptr: &'a [usize],
    rows: &'a [Slot],
}

impl<'a> MaskView<'a> {
    pub fn of<M: Element>(csc: &'a Csc<M>) -> Self {
        debug_assert!(!csc.has_backlog());
        Self {
            col_list: csc.col_list.as_deref(),
            col_ptr: &csc.col_ptr,
            rows: &csc.rows,
        }
    }

    fn nvec(&self) -> usize {
        self.col_ptr.len() - 1
    }

    fn col_range(&self, j: u64) -> Range<usize> {
        let k = match self.col_list {
            Some(list) => match list.binary_search(&j) {
                Ok(k) => k,
                Err(_) => return 0..0,
            },
            None if j < self.nvec() as u64 => j as usize,
            None => return 0..0,
        };
        self.col_ptr[k]..self.col_ptr[k + 1]
    }
}

/// One union column: entry ranges in each input plus the output count.
struct ColTask {
    col: u64,
    a: Range<usize>,
    b: Range<usize>,
    m: Range<usize>,
    count: usize,
}

/// Advance the mask cursor to `row`; true if the mask holds it. Rows
/// arrive ascending per column, so the cursor never rewinds.
#[inline]
fn mask_admits(mrows: &[Slot], cursor: &mut usize, row: u64) -> bool {
    while *cursor < mrows.len() && mrows[*cursor].index() < row {
        *cursor += 1;
    }
    *cursor < mrows.len() && mrows[*cursor].index() == row
}

fn count_one<T: Element>(
    a: &CscView<'_, T>,
    b: &CscView<'_, T>,
    mask: Option<&MaskView<'_>>,
    t: &ColTask,
) -> usize {
    let ar = &a.rows[t.a.clone()];
    let br = &b.rows[t.b.clone()];
    let mrows = mask.map(|m| &m.rows[t.m.clone()]);
    let mut mp = 0;
    let (mut ia, mut ib) = (0, 0);
    let mut n = 0;
    while ia < ar.len() || ib < br.len() {
        let row = match (ar.get(ia), br.get(ib)) {
            (Some(x), Some(y)) => {
                let row = x.index().min(y.index());
                ia += (x.index() == row) as usize;
                ib += (y.index() == row) as usize;
                row
            }
            (Some(x), None) => {
                ia += 1;
                x.index()
            }
            (None, Some(y)) => {
                ib += 1;
                y.index()
            }
            (None, None) => unreachable!(),
        };
        if mrows.is_none_or(|m| mask_admits(m, &mut mp, row)) {
            n += 1;
        }
    }
    n
}

/// Output chunk of one task, carved from the shared buffers.
struct Job<'a, T> {
    task: &'a ColTask,
    rows: &'a mut [Slot],
    vals: &'a mut [T],
}

fn populate_one<T: Element>(
    a: &CscView<'_, T>,
    b: &CscView<'_, T>,
    mask: Option<&MaskView<'_>>,
    op: Option<&dyn Combine<T>>,
    job: &mut Job<'_, T>,
) {
    let t = job.task;
    let ar = &a.rows[t.a.clone()];
    let av = &a.vals[t.a.clone()];
    let br = &b.rows[t.b.clone()];
    let bv = &b.vals[t.b.clone()];
    let mrows = mask.map(|m| &m.rows[t.m.clone()]);
    let mut mp = 0;
    let (mut ia, mut ib) = (0, 0);
    let mut w = 0;
    while ia < ar.len() || ib < br.len() {
        let (row, val) = match (ar.get(ia), br.get(ib)) {
            (Some(x), Some(y)) if x.index() == y.index() => {
                let v = match op {
                    Some(op) => op.combine(&av[ia], &bv[ib]),
                    // no operator: the right (newer) side wins
                    None => bv[ib].clone(),
                };
                ia += 1;
                ib += 1;
                (x.index(), v)
            }
            (Some(x), y) if y.is_none_or(|y| x.index() < y.index()) => {
                ia += 1;
                (x.index(), av[ia - 1].clone())
            }
            (Some(x), None) => {
                ia += 1;
                (x.index(), av[ia - 1].clone())
            }
            (_, Some(y)) => {
                ib += 1;
                (y.index(), bv[ib - 1].clone())
            }
            (None, None) => unreachable!(),
        };
        if mrows.is_none_or(|m| mask_admits(m, &mut mp, row)) {
            job.rows[w] = Slot::live(row);
            job.vals[w] = val;
            w += 1;
        }
    }
    debug_assert_eq!(w, t.count);
}

/// Union-merge two clean views into a fresh hypersparse Csc.
pub(crate) fn add_views<T: Element>(
    a: CscView<'_, T>,
    b: CscView<'_, T>,
    mask: Option<MaskView<'_>>,
    op: Option<&dyn Combine<T>>,
    cfg: &Config,
) -> Result<Csc<T>> {
    debug_assert!(a.rows.iter().all(|s| !s.is_dead()));
    debug_assert!(b.rows.iter().all(|s| !s.is_dead()));

    // locate: one task per union column, skipping columns the mask
    // rules out entirely
    let mut tasks: Vec<ColTask> = Vec::new();
    tasks
        .try_reserve(a.nvec() + b.nvec())
        .map_err(|_| oom_for::<ColTask>(a.nvec() + b.nvec()))?;
    let (mut ka, mut kb) = (0, 0);
    while ka < a.nvec() || kb < b.nvec() {
        let ja = (ka < a.nvec()).then(|| a.col_id(ka));
        let jb = (kb < b.nvec()).then(|| b.col_id(kb));
        let j = match (ja, jb) {
            (Some(x), Some(y)) => x.min(y),
            (Some(x), None) => x,
            (None, Some(y)) => y,
            (None, None) => unreachable!(),
        };
        let arange = if ja == Some(j) {
            ka += 1;
            a.range(ka - 1)
        } else {
            0..0
        };
        let brange = if jb == Some(j) {
            kb += 1;
            b.range(kb - 1)
        } else {
            0..0
        };
        let mrange = match &mask {
            Some(m) => {
                let r = m.col_range(j);
                if r.is_empty() {
                    continue;
                }
                r
            }
            None => 0..0,
        };
        tasks.push(ColTask {
            col: j,
            a: arange,
            b: brange,
            m: mrange,
            count: 0,
        });
    }

    let work = a.nvals() + b.nvals();
    let nthreads = cfg.nthreads_for(work);
    debug!(
        cols = tasks.len(),
        work, nthreads, masked = mask.is_some(), "union-merge"
    );

    // count, then the prefix-sum barrier
    for_each_task(nthreads, cfg.chunk_size, &mut tasks, |t| {
        t.count = count_one(&a, &b, mask.as_ref(), t);
    });
    tasks.retain(|t| t.count > 0);
    let mut col_ptr: Vec<usize> = Vec::new();
    col_ptr
        .try_reserve(tasks.len() + 1)
        .map_err(|_| oom_for::<usize>(tasks.len() + 1))?;
    col_ptr.extend(tasks.iter().map(|t| t.count));
    let total = prefix_sum(&mut col_ptr);
    col_ptr.push(total);

    // populate into disjoint per-column chunks
    let mut out_rows: Vec<Slot> = Vec::new();
    out_rows
        .try_reserve(total)
        .map_err(|_| oom_for::<Slot>(total))?;
    out_rows.resize(total, Slot::default());
    let mut out_vals: Vec<T> = Vec::new();
    out_vals.try_reserve(total).map_err(|_| oom_for::<T>(total))?;
    out_vals.resize(total, T::default());

    let mut jobs: Vec<Job<'_, T>> = Vec::with_capacity(tasks.len());
    let mut rest_r: &mut [Slot] = &mut out_rows;
    let mut rest_v: &mut [T] = &mut out_vals;
    for t in &tasks {
        let (r, rr) = mem::take(&mut rest_r).split_at_mut(t.count);
        let (v, rv) = mem::take(&mut rest_v).split_at_mut(t.count);
        rest_r = rr;
        rest_v = rv;
        jobs.push(Job {
            task: t,
            rows: r,
            vals: v,
        });
    }
    for_each_task(nthreads, cfg.chunk_size, &mut jobs, |job| {
        populate_one(&a, &b, mask.as_ref(), op, job);
    });
    drop(jobs);

    let col_list: Vec<u64> = tasks.iter().map(|t| t.col).collect();
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

impl<T: Element> Matrix<T> {
    /// Union of `self` (left) and `other` (right): every coordinate
    /// present in either input appears in the result. Coordinates present
    /// in both combine through `op`; with no operator the right value
    /// wins. Both inputs reconcile first.
    pub fn union(&mut self, other: &mut Matrix<T>, op: Option<&dyn Combine<T>>) -> Result<Matrix<T>> {
        self.union_inner(other, None::<&mut Matrix<T>>, op)
    }

    /// [`Matrix::union`] restricted to the pattern of `mask`: output
    /// coordinates absent from the mask are dropped. The mask is purely
    /// structural; its values are ignored.
    pub fn union_masked<M: Element>(
        &mut self,
        other: &mut Matrix<T>,
        mask: &mut Matrix<M>,
        op: Option<&dyn Combine<T>>,
    ) -> Result<Matrix<T>> {
        self.union_inner(other, Some(mask), op)
    }

    fn union_inner<M: Element>(
        &mut self,
        other: &mut Matrix<T>,
        mask: Option<&mut Matrix<M>>,
        op: Option<&dyn Combine<T>>,
    ) -> Result<Matrix<T>> {
        if self.nrows != other.nrows || self.ncols != other.ncols {
            return Err(Error::DimensionMismatch {
                a_nrows: self.nrows,
                a_ncols: self.ncols,
                b_nrows: other.nrows,
                b_ncols: other.ncols,
            });
        }
        wait::wait_matrix(self)?;
        wait::wait_matrix(other)?;

        // compressed views over each input; densified inputs get a
        // scratch compressed snapshot
        let mut scratch_a = None;
        let mut scratch_b = None;
        let mut scratch_m = None;
        let a = csc_of(self, &mut scratch_a)?;
        let b = csc_of(other, &mut scratch_b)?;
        let mask = match mask {
            Some(m) => {
                if m.nrows != self.nrows || m.ncols != self.ncols {
                    return Err(Error::DimensionMismatch {
                        a_nrows: self.nrows,
                        a_ncols: self.ncols,
                        b_nrows: m.nrows,
                        b_ncols: m.ncols,
                    });
                }
                wait::wait_matrix(m)?;
                Some(MaskView::of(csc_of(m, &mut scratch_m)?))
            }
            None => None,
        };

        let csc = add_views(a.view(), b.view(), mask, op, &self.config)?;
        let mut out = Matrix {
            nrows: self.nrows,
            ncols: self.ncols,
            store: Store::Csc(csc),
            config: self.config.clone(),
        };
        conform::conform(&mut out)?;
        Ok(out)
    }
}

/// Borrow a matrix's compressed form, snapshotting densified layouts
/// into `scratch`.
fn csc_of<'a, T: Element>(
    m: &'a Matrix<T>,
    scratch: &'a mut Option<Csc<T>>,
) -> Result<&'a Csc<T>> {
    match &m.store {
        Store::Csc(c) => Ok(c),
        _ => Ok(scratch.insert(conform::csc_snapshot(m)?)),
    }
}
