//! Row-index slots with in-place tombstone encoding.
//!
//! A logically deleted entry keeps its physical position; only its row
//! index is re-tagged. The tag is the bitwise complement of the index, so
//! a live index `i < 2^63` becomes the dead value `!i` with the top bit
//! set. The encoding never leaves this module: everything else goes
//! through the accessor pair `is_dead` / `index`.

/// A row index that may be tombstoned in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Slot(u64);

const DEAD_BIT: u64 = 1 << 63;

impl Slot {
    /// A live entry at row `index`.
    #[inline]
    pub fn live(index: u64) -> Self {
        debug_assert!(index & DEAD_BIT == 0, "row index exceeds 2^63");
        Slot(index)
    }

    /// Is this slot tombstoned?
    #[inline]
    pub fn is_dead(self) -> bool {
        self.0 & DEAD_BIT != 0
    }

    /// The logical row index, regardless of liveness.
    #[inline]
    pub fn index(self) -> u64 {
        if self.is_dead() { !self.0 } else { self.0 }
    }

    /// Tombstone a live slot in place.
    #[inline]
    pub fn kill(&mut self) {
        debug_assert!(!self.is_dead());
        self.0 = !self.0;
    }
}

impl Default for Slot {
    fn default() -> Self {
        Slot::live(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_roundtrip() {
        let s = Slot::live(42);
        assert!(!s.is_dead());
        assert_eq!(s.index(), 42);
    }

    #[test]
    fn test_kill_preserves_index() {
        let mut s = Slot::live(7);
        s.kill();
        assert!(s.is_dead());
        assert_eq!(s.index(), 7);
    }

    #[test]
    fn test_zero_index() {
        let mut s = Slot::live(0);
        s.kill();
        assert!(s.is_dead());
        assert_eq!(s.index(), 0);
    }
}
