use rowsieve_error::{DbError, Result};

use super::array::Array;
use super::datatype::DataType;
use super::scalar::ScalarValue;

/// A batch of same-length arrays.
///
/// Batches are the unit of data moving between operators in a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Arrays making up the batch.
    pub(crate) arrays: Vec<Array>,
    /// Number of logical rows in the batch.
    ///
    /// If the batch contains no arrays, number of rows can be arbitarily set.
    pub(crate) num_rows: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self::empty()
    }
}

impl Batch {
    pub const fn empty() -> Self {
        Batch {
            arrays: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn empty_with_num_rows(num_rows: usize) -> Self {
        Batch {
            arrays: Vec::new(),
            num_rows,
        }
    }

    /// Create a batch with zero rows for the given datatypes.
    pub fn new_empty(datatypes: impl IntoIterator<Item = DataType>) -> Self {
        Batch {
            arrays: datatypes.into_iter().map(Array::new_empty).collect(),
            num_rows: 0,
        }
    }

    /// Create a new batch from some number of arrays.
    ///
    /// All arrays must have the same length.
    pub fn try_from_arrays(arrays: impl IntoIterator<Item = Array>) -> Result<Self> {
        let arrays: Vec<_> = arrays.into_iter().collect();
        let num_rows = match arrays.first() {
            Some(arr) => arr.len(),
            None => return Ok(Self::empty()),
        };

        for array in &arrays {
            if array.len() != num_rows {
                return Err(DbError::new(
                    "Attempted to create batch from arrays with different lengths",
                )
                .with_field("expected", num_rows)
                .with_field("got", array.len()));
            }
        }

        Ok(Batch { arrays, num_rows })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_arrays(&self) -> usize {
        self.arrays.len()
    }

    pub fn arrays(&self) -> &[Array] {
        &self.arrays
    }

    pub fn array(&self, idx: usize) -> Result<&Array> {
        self.arrays.get(idx).ok_or_else(|| {
            DbError::new("Array index out of bounds")
                .with_field("idx", idx)
                .with_field("num_arrays", self.arrays.len())
        })
    }

    pub fn datatypes(&self) -> impl Iterator<Item = DataType> + '_ {
        self.arrays.iter().map(|arr| arr.datatype())
    }

    /// Replace the contents of this batch with a copy of `other`.
    pub fn clone_from_other(&mut self, other: &Batch) -> Result<()> {
        if !self.arrays.is_empty() && self.arrays.len() != other.arrays.len() {
            return Err(DbError::new("Batches have different number of arrays")
                .with_field("self", self.arrays.len())
                .with_field("other", other.arrays.len()));
        }

        self.arrays.clone_from(&other.arrays);
        self.num_rows = other.num_rows;

        Ok(())
    }

    /// Select rows in the batch, keeping only the rows at the given indices in
    /// the order provided.
    pub fn select(&mut self, sel: &[usize]) -> Result<()> {
        for arr in &mut self.arrays {
            *arr = arr.select(sel)?;
        }
        self.num_rows = sel.len();

        Ok(())
    }

    /// Replace the contents of this batch with the rows of `other` at the given
    /// indices.
    pub fn select_from_other(&mut self, other: &Batch, sel: &[usize]) -> Result<()> {
        if sel.len() == other.num_rows && sel.iter().enumerate().all(|(idx, &row)| idx == row) {
            return self.clone_from_other(other);
        }

        self.arrays = other
            .arrays
            .iter()
            .map(|arr| arr.select(sel))
            .collect::<Result<Vec<_>>>()?;
        self.num_rows = sel.len();

        Ok(())
    }

    /// Truncate the batch to at most `len` rows.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len >= self.num_rows {
            return Ok(());
        }
        let sel: Vec<_> = (0..len).collect();
        self.select(&sel)
    }

    /// Resets the batch to zero rows, keeping its arrays' data types.
    pub fn reset(&mut self) {
        for arr in &mut self.arrays {
            *arr = Array::new_empty(arr.datatype());
        }
        self.num_rows = 0;
    }

    /// Get the values for a single row.
    pub fn get_row(&self, row: usize) -> Result<Vec<ScalarValue>> {
        self.arrays.iter().map(|arr| arr.get_scalar(row)).collect()
    }

    /// Concatenate batches into a single batch.
    ///
    /// All batches must have the same data types.
    pub fn concat(batches: &[Batch]) -> Result<Batch> {
        let first = match batches.first() {
            Some(first) => first,
            None => return Ok(Batch::empty()),
        };

        let datatypes: Vec<_> = first.datatypes().collect();
        let mut columns: Vec<Vec<ScalarValue>> = vec![Vec::new(); datatypes.len()];

        for batch in batches {
            if !batch.datatypes().eq(datatypes.iter().copied()) {
                return Err(DbError::new("Cannot concat batches with different types"));
            }
            for row in 0..batch.num_rows() {
                for (col, arr) in columns.iter_mut().zip(&batch.arrays) {
                    col.push(arr.get_scalar(row)?);
                }
            }
        }

        let num_rows = batches.iter().map(|b| b.num_rows()).sum();
        if datatypes.is_empty() {
            return Ok(Batch::empty_with_num_rows(num_rows));
        }

        let arrays = datatypes
            .into_iter()
            .zip(columns)
            .map(|(datatype, scalars)| Array::try_from_scalars(datatype, scalars))
            .collect::<Result<Vec<_>>>()?;

        Batch::try_from_arrays(arrays)
    }
}
