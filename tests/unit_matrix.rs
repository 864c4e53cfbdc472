//! End-to-end tests of the public matrix API
//!
//! Exercises whole mutation lifecycles: queueing, tombstoning, forced
//! and automatic reconciliation, layout transitions, bulk loading, and
//! union-merging.

use deltamat::{Combine, CombineArc, DupPolicy, Error, Matrix, Mode, Plus, Sparsity};
use std::sync::Arc;

// ============================================================================
// Mutation Lifecycle
// ============================================================================

#[test]
fn mixed_mutations_resolve_in_order() {
    let mut m: Matrix<u64> = Matrix::new(50, 50);
    m.set(1, 2, 10).unwrap();
    m.set(3, 2, 20).unwrap();
    m.set(1, 2, 11).unwrap();
    assert_eq!(m.get(1, 2).unwrap(), Some(11));
    assert!(m.remove(3, 2).unwrap());
    m.set(40, 49, 30).unwrap();
    assert_eq!(m.nvals().unwrap(), 2);
    let (rows, cols, vals) = m.to_tuples().unwrap();
    assert_eq!(rows, vec![1, 40]);
    assert_eq!(cols, vec![2, 49]);
    assert_eq!(vals, vec![11, 30]);
}

#[test]
fn queue_drains_automatically_past_the_limit() {
    let mut m: Matrix<u64> = Matrix::new(4, 4);
    m.config_mut().pending_floor = 1; // limit becomes nrows + ncols = 8
    for i in 0..16u64 {
        m.set(i % 4, i / 4, i).unwrap();
    }
    assert!(m.is_reconciled());
}

#[test]
fn blocking_mode_never_defers() {
    let mut m: Matrix<u64> = Matrix::new(30, 30);
    m.config_mut().mode = Mode::Blocking;
    for i in 0..5u64 {
        m.set(i, i, i).unwrap();
        assert!(m.is_reconciled());
    }
    assert_eq!(m.nvals().unwrap(), 5);
}

#[test]
fn switching_operators_flushes_between() {
    let plus_a: CombineArc<u64> = Arc::new(Plus);
    let plus_b: CombineArc<u64> = Arc::new(Plus);
    let mut m: Matrix<u64> = Matrix::new(30, 30);
    m.set(0, 0, 5).unwrap();
    m.update(0, 0, 3, plus_a.clone()).unwrap();
    m.update(0, 0, 2, plus_b).unwrap();
    m.update(0, 0, 1, plus_a).unwrap();
    assert_eq!(m.get(0, 0).unwrap(), Some(11));
}

#[test]
fn update_inserts_where_nothing_exists() {
    let plus: CombineArc<u64> = Arc::new(Plus);
    let mut m: Matrix<u64> = Matrix::new(30, 30);
    m.update(7, 7, 40, plus.clone()).unwrap();
    m.update(7, 7, 2, plus).unwrap();
    assert_eq!(m.get(7, 7).unwrap(), Some(42));
    assert_eq!(m.nvals().unwrap(), 1);
}

#[test]
fn clear_resets_to_empty_hypersparse() {
    let mut m: Matrix<u64> = Matrix::new(8, 8);
    for i in 0..8u64 {
        m.set(i, i, i).unwrap();
    }
    m.clear();
    assert!(m.is_reconciled());
    assert_eq!(m.sparsity(), Sparsity::Hypersparse);
    assert_eq!(m.nvals().unwrap(), 0);
    // dimensions survive
    assert!(m.set(7, 7, 1).is_ok());
    assert!(m.set(8, 7, 1).is_err());
}

// ============================================================================
// Bulk Loading
// ============================================================================

#[test]
fn from_tuples_combines_duplicates_in_input_order() {
    let mut m = Matrix::from_tuples(
        30,
        30,
        vec![5, 5, 5],
        vec![3, 3, 3],
        vec![1u64, 2, 3],
        DupPolicy::Combine(&Plus),
    )
    .unwrap();
    assert_eq!(m.get(5, 3).unwrap(), Some(6));
}

#[test]
fn from_tuples_keep_last() {
    let mut m = Matrix::from_tuples(
        30,
        30,
        vec![5, 9, 5],
        vec![3, 0, 3],
        vec![1u64, 7, 3],
        DupPolicy::KeepLast,
    )
    .unwrap();
    assert_eq!(m.get(5, 3).unwrap(), Some(3));
    assert_eq!(m.get(9, 0).unwrap(), Some(7));
}

#[test]
fn from_tuples_reject_duplicates() {
    let err = Matrix::from_tuples(
        30,
        30,
        vec![5, 5],
        vec![3, 3],
        vec![1u64, 2],
        DupPolicy::Reject,
    )
    .unwrap_err();
    assert!(matches!(err, Error::DuplicateTuple { row: 5, col: 3 }));
}

#[test]
fn from_csc_unsorted_columns_read_back_sorted() {
    // two columns, both loaded out of order
    let mut m = Matrix::from_csc(
        100,
        100,
        {
            let mut ptr = vec![0usize; 101];
            for p in ptr.iter_mut().skip(1) {
                *p = 4;
            }
            ptr[1] = 2;
            ptr
        },
        vec![9, 4, 30, 11],
        vec![90u64, 40, 300, 110],
        false,
    );
    let (rows, cols, vals) = m.to_tuples().unwrap();
    assert_eq!(rows, vec![4, 9, 11, 30]);
    assert_eq!(cols, vec![0, 0, 1, 1]);
    assert_eq!(vals, vec![40, 90, 110, 300]);
}

// ============================================================================
// Layout Transitions
// ============================================================================

#[test]
fn density_walks_through_every_layout() {
    let mut m: Matrix<u64> = Matrix::new(4, 4);
    assert_eq!(m.sparsity(), Sparsity::Hypersparse);
    for i in 0..16u64 {
        m.set(i % 4, i / 4, i).unwrap();
    }
    m.reconcile().unwrap();
    assert_eq!(m.sparsity(), Sparsity::Full);
    for i in 0..14u64 {
        m.remove(i % 4, i / 4).unwrap();
    }
    m.reconcile().unwrap();
    assert_eq!(m.sparsity(), Sparsity::Bitmap);
    m.remove(14 % 4, 14 / 4).unwrap();
    m.reconcile().unwrap();
    assert_ne!(m.sparsity(), Sparsity::Bitmap);
    assert_eq!(m.get(3, 3).unwrap(), Some(15));
}

#[test]
fn dense_layouts_mutate_in_place() {
    let mut m: Matrix<u64> = Matrix::new(4, 4);
    for i in 0..16u64 {
        m.set(i % 4, i / 4, 0).unwrap();
    }
    m.reconcile().unwrap();
    assert_eq!(m.sparsity(), Sparsity::Full);
    m.set(2, 2, 99).unwrap();
    // no backlog forms on a full matrix
    assert!(m.is_reconciled());
    assert_eq!(m.get(2, 2).unwrap(), Some(99));
    let plus: CombineArc<u64> = Arc::new(Plus);
    m.update(2, 2, 1, plus).unwrap();
    assert_eq!(m.get(2, 2).unwrap(), Some(100));
}

// ============================================================================
// Union
// ============================================================================

#[test]
fn union_of_backlogged_matrices() {
    let mut a: Matrix<u64> = Matrix::new(60, 60);
    let mut b: Matrix<u64> = Matrix::new(60, 60);
    a.set(0, 0, 1).unwrap();
    a.set(5, 5, 2).unwrap();
    b.set(5, 5, 10).unwrap();
    b.set(9, 9, 3).unwrap();
    b.remove(9, 9).unwrap();

    let mut sum = a.union(&mut b, Some(&Plus)).unwrap();
    assert_eq!(sum.get(0, 0).unwrap(), Some(1));
    assert_eq!(sum.get(5, 5).unwrap(), Some(12));
    assert_eq!(sum.get(9, 9).unwrap(), None);
    assert_eq!(sum.nvals().unwrap(), 2);

    let mut last = a.union(&mut b, None).unwrap();
    assert_eq!(last.get(5, 5).unwrap(), Some(10));
}

#[test]
fn masked_union_with_custom_operator() {
    let min = |a: &u64, b: &u64| (*a).min(*b);
    let mut a = Matrix::from_tuples(
        60,
        60,
        vec![0, 1, 2],
        vec![0, 1, 2],
        vec![5u64, 6, 7],
        DupPolicy::Reject,
    )
    .unwrap();
    let mut b = Matrix::from_tuples(
        60,
        60,
        vec![1, 3],
        vec![1, 3],
        vec![2u64, 9],
        DupPolicy::Reject,
    )
    .unwrap();
    // mask admits the diagonal except (2, 2); mask values are ignored
    let mut mask = Matrix::from_tuples(
        60,
        60,
        vec![0, 1, 3],
        vec![0, 1, 3],
        vec![0u8, 0, 0],
        DupPolicy::Reject,
    )
    .unwrap();
    let mut out = a.union_masked(&mut b, &mut mask, Some(&min)).unwrap();
    assert_eq!(out.get(0, 0).unwrap(), Some(5));
    assert_eq!(out.get(1, 1).unwrap(), Some(2));
    assert_eq!(out.get(2, 2).unwrap(), None);
    assert_eq!(out.get(3, 3).unwrap(), Some(9));
}

#[test]
fn union_respects_the_combine_trait_object() {
    struct SaturatingSub;
    impl Combine<u64> for SaturatingSub {
        fn combine(&self, left: &u64, right: &u64) -> u64 {
            left.saturating_sub(*right)
        }
    }
    let mut a = Matrix::from_tuples(8, 8, vec![0], vec![0], vec![10u64], DupPolicy::Reject).unwrap();
    let mut b = Matrix::from_tuples(8, 8, vec![0], vec![0], vec![3u64], DupPolicy::Reject).unwrap();
    let mut out = a.union(&mut b, Some(&SaturatingSub)).unwrap();
    assert_eq!(out.get(0, 0).unwrap(), Some(7));
}
