//! The pending queue: deferred (row, column, value) writes.
//!
//! A growable columnar buffer of not-yet-applied tuples, attached to a
//! matrix in compressed-column form. The queue is write-only; nothing
//! reads it until reconciliation consumes it whole. The column array is
//! elided for single-column matrices.
//!
//! Sortedness is tracked incrementally: the flag is true only while every
//! appended tuple compares `(col, row)` non-decreasing against its
//! predecessor. It is never re-verified outside debug assertions.

use crate::error::{Result, oom_for};
use crate::ops::CombineArc;

#[derive(Clone)]
pub(crate) struct PendingQueue<T> {
    rows: Vec<u64>,
    cols: Option<Vec<u64>>,
    vals: Vec<T>,
    sorted: bool,
    poisoned: bool,
    op: Option<CombineArc<T>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for PendingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQueue")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("vals", &self.vals)
            .field("sorted", &self.sorted)
            .field("poisoned", &self.poisoned)
            .field("op", &self.op.as_ref().map(|_| "<dyn Combine>"))
            .finish()
    }
}

impl<T> PendingQueue<T> {
    /// An empty queue. `single_col` elides the column array.
    pub fn new(single_col: bool, op: Option<CombineArc<T>>) -> Self {
        Self {
            rows: Vec::new(),
            cols: if single_col { None } else { Some(Vec::new()) },
            vals: Vec::new(),
            sorted: true,
            poisoned: false,
            op,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A queue that failed to grow is unusable; the owner must discard it,
    /// which forces a full reconciliation on the next mutation.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn op(&self) -> Option<&CombineArc<T>> {
        self.op.as_ref()
    }

    /// Grow the buffers to hold `extra` more tuples: at least doubling
    /// the current capacity so appends stay O(1) amortized.
    pub fn ensure(&mut self, extra: usize) -> Result<()> {
        debug_assert!(!self.poisoned);
        if self.rows.capacity() - self.rows.len() >= extra {
            return Ok(());
        }
        let want = extra.max(self.rows.capacity().max(4));
        let grow = |r: std::result::Result<(), std::collections::TryReserveError>| {
            r.map_err(|_| oom_for::<u64>(want))
        };
        let outcome = grow(self.rows.try_reserve(want))
            .and_then(|()| match &mut self.cols {
                Some(cols) => grow(cols.try_reserve(want)),
                None => Ok(()),
            })
            .and_then(|()| {
                self.vals
                    .try_reserve(want)
                    .map_err(|_| oom_for::<T>(want))
            });
        if outcome.is_err() {
            self.poisoned = true;
        }
        outcome
    }

    /// Append one tuple. The caller has already called [`ensure`].
    pub fn append(&mut self, row: u64, col: u64, val: T) {
        debug_assert!(!self.poisoned);
        debug_assert!(self.rows.len() < self.rows.capacity());
        if self.sorted {
            if let Some(&prev_row) = self.rows.last() {
                let prev_col = self
                    .cols
                    .as_ref()
                    .and_then(|c| c.last().copied())
                    .unwrap_or(0);
                self.sorted = (prev_col, prev_row) <= (col, row);
            }
        }
        self.rows.push(row);
        if let Some(cols) = &mut self.cols {
            cols.push(col);
        } else {
            debug_assert_eq!(col, 0);
        }
        self.vals.push(val);
    }

    /// Tear the queue apart for the tuple builder.
    #[allow(clippy::type_complexity)]
    pub fn into_parts(self) -> (Vec<u64>, Option<Vec<u64>>, Vec<T>, bool, Option<CombineArc<T>>) {
        (self.rows, self.cols, self.vals, self.sorted, self.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_tracks_sortedness() {
        let mut q: PendingQueue<u64> = PendingQueue::new(false, None);
        q.ensure(4).unwrap();
        q.append(1, 0, 10);
        q.append(5, 0, 11);
        q.append(2, 1, 12);
        assert!(!q.is_empty());
        assert_eq!(q.len(), 3);
        let (_, _, _, sorted, _) = q.into_parts();
        assert!(sorted);
    }

    #[test]
    fn test_out_of_order_append_clears_flag() {
        let mut q: PendingQueue<u64> = PendingQueue::new(false, None);
        q.ensure(3).unwrap();
        q.append(1, 2, 10);
        q.append(5, 0, 11);
        let (_, _, _, sorted, _) = q.into_parts();
        assert!(!sorted);
    }

    #[test]
    fn test_single_column_queue_has_no_col_array() {
        let mut q: PendingQueue<u64> = PendingQueue::new(true, None);
        q.ensure(2).unwrap();
        q.append(4, 0, 1);
        q.append(2, 0, 2);
        let (rows, cols, _, sorted, _) = q.into_parts();
        assert_eq!(rows, vec![4, 2]);
        assert!(cols.is_none());
        assert!(!sorted);
    }

    #[test]
    fn test_ensure_doubles() {
        let mut q: PendingQueue<u64> = PendingQueue::new(false, None);
        q.ensure(1).unwrap();
        let cap = { q.rows.capacity() };
        q.append(0, 0, 0);
        q.ensure(1).unwrap();
        assert!(q.rows.capacity() >= cap);
    }
}
