use hashbrown::HashTable;
use rowsieve_error::Result;

use super::size_limits::SetUsage;
use crate::arrays::array::Array;
use crate::arrays::scalar::ScalarValue;

/// Values for the distinct columns of a single row alongside the row's hash.
#[derive(Debug)]
struct Fingerprint {
    hash: u64,
    values: Box<[ScalarValue]>,
}

impl Fingerprint {
    /// Estimated number of bytes this fingerprint holds in the set.
    fn size_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.values.len() * std::mem::size_of::<ScalarValue>()
            + self.values.iter().map(|v| v.heap_size()).sum::<usize>()
    }
}

/// Set of row fingerprints.
///
/// Rows are looked up directly against the input arrays, only rows that get
/// inserted allocate.
#[derive(Debug, Default)]
pub struct FingerprintSet {
    table: HashTable<Fingerprint>,
    bytes: usize,
}

impl FingerprintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn usage(&self) -> SetUsage {
        SetUsage {
            rows: self.table.len(),
            bytes: self.bytes,
        }
    }

    /// Remove all fingerprints, keeping allocated capacity.
    pub fn clear(&mut self) {
        self.table.clear();
        self.bytes = 0;
    }

    /// Insert the fingerprint for `row` made up of values from `columns`.
    ///
    /// `hash` must be the combined hash of the row's values in `columns`.
    ///
    /// Returns true if the fingerprint wasn't already in the set.
    pub fn insert_row(&mut self, hash: u64, columns: &[&Array], row: usize) -> Result<bool> {
        let existing = self.table.find(hash, |fp| {
            fp.hash == hash
                && fp
                    .values
                    .iter()
                    .zip(columns)
                    .all(|(val, arr)| arr.scalar_eq(row, val))
        });
        if existing.is_some() {
            return Ok(false);
        }

        let values = columns
            .iter()
            .map(|arr| arr.get_scalar(row))
            .collect::<Result<Box<[_]>>>()?;

        let fingerprint = Fingerprint { hash, values };
        self.bytes += fingerprint.size_bytes();
        self.table
            .insert_unique(hash, fingerprint, |fp| fp.hash);

        Ok(true)
    }
}
