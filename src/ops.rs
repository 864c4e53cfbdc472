//! Combining operators and the element-type seam.
//!
//! A [`Combine`] operator resolves two values competing for one coordinate:
//! duplicate pending tuples folded by the tuple builder, and entries
//! present on both sides of a union-merge. The operator is always applied
//! as `op(left, right)` where `left` is the older value.

use std::fmt::Debug;
use std::ops::Add;
use std::sync::Arc;

/// Bounds every stored element type must satisfy.
///
/// `Default` is required so value buffers can be pre-sized before the
/// parallel populate phase writes into disjoint slices.
pub trait Element: Clone + Debug + Default + PartialEq + Send + Sync + 'static {}

impl<T> Element for T where T: Clone + Debug + Default + PartialEq + Send + Sync + 'static {}

/// A binary combining operator over element values.
pub trait Combine<T>: Send + Sync {
    /// Combine the older (`left`) and newer (`right`) value at one
    /// coordinate.
    fn combine(&self, left: &T, right: &T) -> T;
}

impl<T, F> Combine<T> for F
where
    F: Fn(&T, &T) -> T + Send + Sync,
{
    #[inline]
    fn combine(&self, left: &T, right: &T) -> T {
        self(left, right)
    }
}

/// Keep the newer value ("overwrite" semantics).
#[derive(Clone, Copy, Debug, Default)]
pub struct Second;

impl<T: Clone> Combine<T> for Second {
    #[inline]
    fn combine(&self, _left: &T, right: &T) -> T {
        right.clone()
    }
}

/// Add the two values.
#[derive(Clone, Copy, Debug, Default)]
pub struct Plus;

impl<T> Combine<T> for Plus
where
    T: Clone + Add<Output = T> + Send + Sync,
{
    #[inline]
    fn combine(&self, left: &T, right: &T) -> T {
        left.clone() + right.clone()
    }
}

/// Shared handle to a combining operator, as stored on a pending queue.
pub type CombineArc<T> = Arc<dyn Combine<T>>;

/// Two queue operators are interchangeable only if they are the same
/// object (or both absent, meaning keep-last).
pub(crate) fn same_op<T>(a: Option<&CombineArc<T>>, b: Option<&CombineArc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_keeps_right() {
        assert_eq!(Second.combine(&1u64, &9u64), 9);
    }

    #[test]
    fn test_plus_adds() {
        assert_eq!(Plus.combine(&3u64, &4u64), 7);
    }

    #[test]
    fn test_closure_combiner() {
        let min = |a: &u64, b: &u64| (*a).min(*b);
        assert_eq!(min.combine(&3, &4), 3);
    }

    #[test]
    fn test_same_op_is_identity_based() {
        let a: CombineArc<u64> = Arc::new(Plus);
        let b: CombineArc<u64> = Arc::new(Plus);
        assert!(same_op(Some(&a), Some(&a.clone())));
        assert!(!same_op(Some(&a), Some(&b)));
        assert!(same_op::<u64>(None, None));
        assert!(!same_op(Some(&a), None));
    }
}
