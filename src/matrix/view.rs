//! Borrowed, read-only views over compressed-column storage.
//!
//! The merge engine works on two inputs and an optional mask without
//! caring whether each lives in a full matrix or in a scratch side
//! matrix, so it takes this borrowed form of the Csc layout. A view is
//! always clean: no pending queue, no tombstones, no jumble. Producers
//! reconcile before lending one out.

use super::core::Csc;
use super::slot::Slot;
use crate::ops::Element;
use std::ops::Range;

/// A clean compressed-column matrix, borrowed.
#[derive(Clone, Copy)]
pub(crate) struct CscView<'a, T> {
    /// Occupied column ids when hypersparse.
    pub col_list: Option<&'a [u64]>,
    pub col_ptr: &'a [usize],
    pub rows: &'a [Slot],
    pub vals: &'a [T],
}

impl<'a, T: Element> CscView<'a, T> {
    #[inline]
    pub fn nvec(&self) -> usize {
        self.col_ptr.len() - 1
    }

    #[inline]
    pub fn nvals(&self) -> usize {
        *self.col_ptr.last().unwrap_or(&0) - self.col_ptr.first().unwrap_or(&0)
    }

    #[inline]
    pub fn col_id(&self, k: usize) -> u64 {
        match self.col_list {
            Some(list) => list[k],
            None => k as u64,
        }
    }

    /// Entry range of column group `k`, rebased so it indexes `rows` and
    /// `vals` directly even when the view borrows a matrix tail.
    #[inline]
    pub fn range(&self, k: usize) -> Range<usize> {
        let base = self.col_ptr[0];
        (self.col_ptr[k] - base)..(self.col_ptr[k + 1] - base)
    }
}

impl<T: Element> Csc<T> {
    /// Borrow the whole matrix. Requires a clean matrix.
    pub fn view(&self) -> CscView<'_, T> {
        debug_assert!(!self.has_backlog());
        CscView {
            col_list: self.col_list.as_deref(),
            col_ptr: &self.col_ptr,
            rows: &self.rows,
            vals: &self.vals,
        }
    }
}
