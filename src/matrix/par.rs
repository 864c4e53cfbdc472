//! Sequential-or-parallel dispatch for the per-column task loops.
//!
//! The count and populate phases of merging (and the per-column sort of
//! reconciliation) are embarrassingly parallel across columns, but the
//! rayon machinery is pure overhead on small problems. Callers decide a
//! thread count from [`crate::config::Config::nthreads_for`] and hand the
//! task list here.

use rayon::prelude::*;

/// Apply `f` to every task, in parallel when more than one worker was
/// granted. `min_chunk` keeps rayon from splitting below a useful grain.
pub(crate) fn for_each_task<I, F>(nthreads: usize, min_chunk: usize, tasks: &mut [I], f: F)
where
    I: Send,
    F: Fn(&mut I) + Send + Sync,
{
    if nthreads > 1 {
        tasks
            .par_iter_mut()
            .with_min_len(min_chunk.max(1))
            .for_each(|t| f(t));
    } else {
        for t in tasks.iter_mut() {
            f(t);
        }
    }
}

/// Exclusive prefix sum in place: each element becomes the sum of those
/// before it; returns the grand total. Small enough that it never pays to
/// parallelize.
pub(crate) fn prefix_sum(counts: &mut [usize]) -> usize {
    let mut total = 0;
    for c in counts.iter_mut() {
        let n = *c;
        *c = total;
        total += n;
    }
    total
}
