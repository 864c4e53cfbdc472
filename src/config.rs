//! Per-matrix tuning knobs.
//!
//! Every threshold the storage engine consults lives here: the format
//! switch-points, the incremental-append ratio, the deferred-mutation
//! backlog limit, and the parallelism hints supplied by the embedding
//! process. All of them are plain data with conservative defaults; none
//! are read from the environment.

/// When reconciliation runs relative to mutations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Reconcile after every mutation. Reads never observe backlog.
    Blocking,
    /// Defer reconciliation until a read, a size query, or the backlog
    /// threshold is exceeded.
    #[default]
    NonBlocking,
}

/// Tuning knobs for one matrix.
#[derive(Clone, Debug)]
pub struct Config {
    /// Store the occupied-column list when the occupied-column count is
    /// below `hyper_switch * ncols`.
    pub hyper_switch: f64,
    /// Switch to the bitmap layout when density exceeds this fraction
    /// (and the matrix is not completely full).
    pub bitmap_switch: f64,
    /// Reconcile incrementally when `append_ratio * tail_entries` is
    /// still smaller than the untouched head. A tunable constant, not a
    /// proven-optimal threshold.
    pub append_ratio: usize,
    /// Force reconciliation once the pending queue holds more than
    /// `max(pending_floor, nrows + ncols)` tuples (non-blocking mode).
    pub pending_floor: usize,
    /// Below this many units of work, loops run single-threaded.
    pub parallel_threshold: usize,
    /// Upper bound on worker threads per call. `0` means "whatever the
    /// global pool offers".
    pub nthreads_max: usize,
    /// Minimum number of columns handed to one worker.
    pub chunk_size: usize,
    /// Blocking or non-blocking mutation behavior.
    pub mode: Mode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hyper_switch: 0.0625,
            bitmap_switch: 0.10,
            append_ratio: 2,
            pending_floor: 4096,
            parallel_threshold: 1 << 14,
            nthreads_max: 0,
            chunk_size: 64,
            mode: Mode::NonBlocking,
        }
    }
}

impl Config {
    /// Backlog size at which a mutation triggers reconciliation.
    pub(crate) fn pending_limit(&self, nrows: u64, ncols: u64) -> usize {
        let dim = nrows.saturating_add(ncols).min(usize::MAX as u64) as usize;
        self.pending_floor.max(dim)
    }

    /// Worker-thread count for a problem of `work` units. Single-threaded
    /// below the parallel threshold; otherwise bounded by `nthreads_max`
    /// and the global pool.
    pub(crate) fn nthreads_for(&self, work: usize) -> usize {
        if work < self.parallel_threshold {
            return 1;
        }
        let pool = rayon::current_num_threads();
        if self.nthreads_max == 0 {
            pool
        } else {
            pool.min(self.nthreads_max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_limit_scales_with_dims() {
        let cfg = Config::default();
        assert_eq!(cfg.pending_limit(10, 10), cfg.pending_floor);
        assert_eq!(cfg.pending_limit(1 << 20, 1 << 20), 2 << 20);
    }

    #[test]
    fn test_small_problems_are_sequential() {
        let cfg = Config::default();
        assert_eq!(cfg.nthreads_for(16), 1);
        assert!(cfg.nthreads_for(1 << 20) >= 1);
    }
}
