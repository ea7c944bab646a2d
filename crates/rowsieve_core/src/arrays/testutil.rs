//! Test utilities.
//!
//! Note this this isn't behind a `#[cfg(test)]` flag since this should be
//! usable outside of this crate.
//!
//! Should not be used outside of tests.

use crate::arrays::array::Array;
use crate::arrays::batch::Batch;
use crate::arrays::scalar::ScalarValue;

/// Generate a batch from a list of column values.
///
/// Each argument must be convertible into an array with `IntoArray`.
///
/// ```
/// use rowsieve_core::generate_batch;
///
/// let batch = generate_batch!([1, 2, 3], ["a", "b", "c"]);
/// assert_eq!(3, batch.num_rows());
/// ```
#[macro_export]
macro_rules! generate_batch {
    ( $( $col:expr ),+ $(,)? ) => {{
        $crate::arrays::batch::Batch::try_from_arrays([
            $( $crate::arrays::array::IntoArray::into_array($col) ),+
        ]).unwrap()
    }};
}

/// Asserts that two arrays are logically equal.
#[track_caller]
pub fn assert_arrays_eq(a: &Array, b: &Array) {
    assert_eq!(a.datatype(), b.datatype(), "data types differ");
    assert_eq!(a.len(), b.len(), "lengths differ");

    for row_idx in 0..a.len() {
        let a_val = a.get_scalar(row_idx).unwrap();
        let b_val = b.get_scalar(row_idx).unwrap();

        assert_eq!(a_val, b_val, "values differ at row {row_idx}");
    }
}

/// Asserts that two batches are logically equal.
#[track_caller]
pub fn assert_batches_eq(a: &Batch, b: &Batch) {
    assert_eq!(a.num_rows(), b.num_rows(), "num rows differ");
    assert_eq!(a.num_arrays(), b.num_arrays(), "num arrays differ");

    for (a_col, b_col) in a.arrays().iter().zip(b.arrays()) {
        assert_arrays_eq(a_col, b_col);
    }
}

/// Collect every row across all batches.
pub fn collect_rows<'a>(batches: impl IntoIterator<Item = &'a Batch>) -> Vec<Vec<ScalarValue>> {
    let mut rows = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            rows.push(batch.get_row(row).unwrap());
        }
    }
    rows
}

/// Asserts that the rows across all batches are equal to `expected`, ignoring
/// row order.
#[track_caller]
pub fn assert_rows_eq_unordered<'a>(
    expected: impl IntoIterator<Item = &'a Batch>,
    got: impl IntoIterator<Item = &'a Batch>,
) {
    let mut expected = collect_rows(expected);
    let mut got = collect_rows(got);

    let sort_key = |row: &Vec<ScalarValue>| row.iter().map(|v| v.to_string()).collect::<Vec<_>>();
    expected.sort_by_key(sort_key);
    got.sort_by_key(sort_key);

    assert_eq!(expected, got);
}
