//! Reconciliation: drain the backlog and restore a canonical matrix.
//!
//! The sequence for a compressed matrix with backlog:
//!
//! 1. drop the pending queue off the matrix;
//! 2. prune tombstones in place (stable compaction per column);
//! 3. sort any jumbled column runs;
//! 4. build a side matrix from the queued tuples (sort, fold duplicates
//!    through the queue operator);
//! 5. merge the side matrix back in, choosing between a straight
//!    transplant (main matrix empty), an incremental tail merge (the
//!    queue only touched the trailing columns), and a full remerge;
//! 6. conform the physical layout and refresh the occupancy cache.
//!
//! Reconciliation is all-or-nothing: on any failure the caller-facing
//! wrapper clears the matrix, so a matrix is never observed half-merged.
//! Bitmap and full matrices carry no backlog and reconcile trivially.

use tracing::debug;

use crate::config::Config;
use crate::error::{Result, oom_for};
use crate::ops::{CombineArc, Element};

use super::build::{self, DupPolicy};
use super::core::{Csc, Matrix, Store};
use super::par::for_each_task;
use super::slot::Slot;
use super::view::CscView;
use super::{conform, merge};

/// Reconcile `m` completely. On failure the matrix is cleared before the
/// error propagates.
pub(crate) fn wait_matrix<T: Element>(m: &mut Matrix<T>) -> Result<()> {
    // nothing queued: refresh the occupancy cache and re-check the
    // layout thresholds (deletions can leave a bitmap too sparse)
    if m.is_reconciled() {
        if let Store::Csc(c) = &mut m.store {
            c.nvec_nonempty();
        }
        let out = conform::conform(m);
        if out.is_err() {
            m.clear();
        }
        return out;
    }
    let out = wait_inner(m);
    if out.is_err() {
        m.clear();
    }
    debug_assert!(out.is_err() || m.is_reconciled());
    out
}

fn wait_inner<T: Element>(m: &mut Matrix<T>) -> Result<()> {
    let (nrows, ncols) = (m.nrows, m.ncols);
    {
        let Store::Csc(c) = &mut m.store else {
            return Ok(());
        };
        let pending = c.pending.take();
        let npending = pending.as_ref().map_or(0, |q| q.len());
        debug!(
            npending,
            nzombies = c.nzombies,
            jumbled = c.jumbled,
            "reconcile"
        );

        if c.nzombies > 0 {
            prune_zombies(c);
        }
        if c.jumbled {
            sort_columns(c, &m.config);
        }

        if let Some(q) = pending
            && !q.is_empty()
        {
            let (qrows, qcols, qvals, sorted, op) = q.into_parts();
            let dup = match &op {
                Some(op) => DupPolicy::Combine(op.as_ref()),
                None => DupPolicy::KeepLast,
            };
            let side = build::build_csc(nrows, ncols, qrows, qcols, qvals, sorted, dup, &m.config)?;
            merge_side(c, side, op, &m.config)?;
        }

        c.nvec_nonempty = None;
        c.nvec_nonempty();
    }
    conform::conform(m)
}

/// Fold the side matrix of queued tuples back into the main matrix.
/// `op` combines an existing entry (left) with a queued one (right);
/// absent, the queued value overwrites.
fn merge_side<T: Element>(
    c: &mut Csc<T>,
    side: Csc<T>,
    op: Option<CombineArc<T>>,
    cfg: &Config,
) -> Result<()> {
    debug_assert!(!c.has_backlog() && !side.has_backlog());
    if c.rows.is_empty() {
        // transplant: nothing to merge against
        *c = side;
        return Ok(());
    }

    // first column the queue touched; everything strictly before it is
    // untouched head
    let sjfirst = side.col_id(0);
    let k0 = match &c.col_list {
        Some(list) => list.partition_point(|&j| j < sjfirst),
        None => (sjfirst as usize).min(c.nvec()),
    };
    let anz0 = c.col_ptr[k0];
    let anz1 = c.rows.len() - anz0;
    let op_ref = op.as_deref();

    if cfg.append_ratio * anz1 < anz0 {
        // incremental: merge the side matrix against the tail only, then
        // splice the result after the untouched head
        debug!(anz0, anz1, snz = side.rows.len(), "incremental tail merge");
        let tail_cols: Vec<u64> = (k0..c.nvec()).map(|k| c.col_id(k)).collect();
        let tail = CscView {
            col_list: Some(&tail_cols),
            col_ptr: &c.col_ptr[k0..],
            rows: &c.rows[anz0..],
            vals: &c.vals[anz0..],
        };
        let merged = merge::add_views(tail, side.view(), None, op_ref, cfg)?;
        drop(tail_cols);
        splice_tail(c, k0, merged)
    } else {
        debug!(anz0, anz1, snz = side.rows.len(), "full remerge");
        *c = merge::add_views(c.view(), side.view(), None, op_ref, cfg)?;
        Ok(())
    }
}

/// Replace the column groups from `k0` on with `merged`, leaving the head
/// untouched. The result is hypersparse; conformance reconsiders later.
fn splice_tail<T: Element>(c: &mut Csc<T>, k0: usize, merged: Csc<T>) -> Result<()> {
    let anz0 = c.col_ptr[k0];
    let extra = merged.rows.len();
    c.rows.truncate(anz0);
    c.vals.truncate(anz0);
    c.rows
        .try_reserve(extra)
        .map_err(|_| oom_for::<Slot>(extra))?;
    c.vals.try_reserve(extra).map_err(|_| oom_for::<T>(extra))?;
    c.rows.extend_from_slice(&merged.rows);
    c.vals.extend(merged.vals);

    let snvec = merged.col_ptr.len() - 1;
    let mut col_list: Vec<u64> = Vec::new();
    col_list
        .try_reserve(k0 + snvec)
        .map_err(|_| oom_for::<u64>(k0 + snvec))?;
    match &c.col_list {
        Some(list) => col_list.extend_from_slice(&list[..k0]),
        None => col_list.extend(0..k0 as u64),
    }
    match &merged.col_list {
        Some(list) => col_list.extend_from_slice(list),
        None => col_list.extend(0..snvec as u64),
    }
    debug_assert!(col_list.windows(2).all(|w| w[0] < w[1]));

    c.col_ptr.truncate(k0 + 1);
    c.col_ptr
        .try_reserve(snvec)
        .map_err(|_| oom_for::<usize>(snvec))?;
    for k in 1..=snvec {
        c.col_ptr.push(anz0 + merged.col_ptr[k]);
    }
    c.col_list = Some(col_list);
    c.nvec_nonempty = None;
    Ok(())
}

/// Remove tombstoned entries in place, one stable compaction pass.
fn prune_zombies<T: Element>(c: &mut Csc<T>) {
    debug_assert!(c.pending.is_none());
    let nvec = c.nvec();
    let mut w = 0;
    for k in 0..nvec {
        let (start, end) = (c.col_ptr[k], c.col_ptr[k + 1]);
        c.col_ptr[k] = w;
        for r in start..end {
            if !c.rows[r].is_dead() {
                c.rows[w] = c.rows[r];
                c.vals.swap(w, r);
                w += 1;
            }
        }
    }
    c.col_ptr[nvec] = w;
    c.rows.truncate(w);
    c.vals.truncate(w);
    c.nzombies = 0;
    c.nvec_nonempty = None;
}

/// Sort every out-of-order column run by row index. Runs are disjoint, so
/// columns sort in parallel on large matrices.
fn sort_columns<T: Element>(c: &mut Csc<T>, cfg: &Config) {
    debug_assert!(c.nzombies == 0 && c.pending.is_none());
    let nthreads = cfg.nthreads_for(c.rows.len());
    let lens: Vec<usize> = (0..c.nvec())
        .map(|k| c.col_ptr[k + 1] - c.col_ptr[k])
        .collect();
    let mut jobs: Vec<(&mut [Slot], &mut [T])> = Vec::with_capacity(lens.len());
    let mut rest_r: &mut [Slot] = &mut c.rows;
    let mut rest_v: &mut [T] = &mut c.vals;
    for &len in &lens {
        let (r, rr) = std::mem::take(&mut rest_r).split_at_mut(len);
        let (v, rv) = std::mem::take(&mut rest_v).split_at_mut(len);
        rest_r = rr;
        rest_v = rv;
        jobs.push((r, v));
    }
    for_each_task(nthreads, cfg.chunk_size, &mut jobs, |(rows, vals)| {
        if rows.is_sorted_by_key(|s| s.index()) {
            return;
        }
        let mut run: Vec<(Slot, T)> = rows
            .iter()
            .copied()
            .zip(vals.iter().cloned())
            .collect();
        run.sort_by_key(|(s, _)| s.index());
        for (i, (s, v)) in run.into_iter().enumerate() {
            rows[i] = s;
            vals[i] = v;
        }
    });
    c.jumbled = false;
}
