use rowsieve_error::Result;
use tracing::{debug, warn};

use super::EmittedRows;
use super::fingerprint_set::FingerprintSet;
use super::size_limits::{LimitCheck, SetUsage, SizeLimits};
use crate::arrays::array::Array;
use crate::arrays::batch::Batch;
use crate::arrays::compute::hash::hash_many_arrays;
use crate::arrays::scalar::ScalarValue;
use crate::execution::operators::PollExecute;

/// Partition state for deduplicating rows from input sorted on a prefix of
/// the distinct columns.
///
/// Only a single group (rows sharing the same prefix values) is tracked at a
/// time. Input that isn't actually sorted on the prefix produces duplicates in
/// the output, this is not detected.
#[derive(Debug)]
pub struct SortedDistinctState {
    /// Indices of the sorted prefix columns, in sort order.
    prefix_columns: Vec<usize>,
    /// Indices of distinct columns not part of the prefix.
    ///
    /// Empty if the distinct columns are exactly the prefix.
    remaining_columns: Vec<usize>,
    limits: SizeLimits,
    /// Prefix values for the current group.
    group_key: Option<Vec<ScalarValue>>,
    /// Fingerprints of the remaining columns for the current group.
    group_set: FingerprintSet,
    emitted: EmittedRows,
    passthrough: bool,
    hashes: Vec<u64>,
    selection: Vec<usize>,
}

impl SortedDistinctState {
    pub fn new(
        prefix_columns: Vec<usize>,
        remaining_columns: Vec<usize>,
        limits: SizeLimits,
        limit_hint: Option<usize>,
    ) -> Self {
        SortedDistinctState {
            prefix_columns,
            remaining_columns,
            limits,
            group_key: None,
            group_set: FingerprintSet::new(),
            emitted: EmittedRows::new(limit_hint),
            passthrough: false,
            hashes: Vec::new(),
            selection: Vec::new(),
        }
    }

    /// Usage of the set for the current group.
    pub fn set_usage(&self) -> SetUsage {
        self.group_set.usage()
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn emitted(&self) -> usize {
        self.emitted.count()
    }

    /// Deduplicate `input`, writing surviving rows to `output`.
    pub fn process(&mut self, input: &Batch, output: &mut Batch) -> Result<PollExecute> {
        let num_rows = input.num_rows();
        let prefix = self
            .prefix_columns
            .iter()
            .map(|&idx| input.array(idx))
            .collect::<Result<Vec<&Array>>>()?;
        let remaining = self
            .remaining_columns
            .iter()
            .map(|&idx| input.array(idx))
            .collect::<Result<Vec<&Array>>>()?;

        self.selection.clear();
        if !self.passthrough && !remaining.is_empty() {
            self.hashes.resize(num_rows, 0);
            hash_many_arrays(remaining.iter().copied(), &mut self.hashes)?;
        }

        for row in 0..num_rows {
            if self.emitted.hint_reached() {
                break;
            }

            if self.passthrough {
                self.selection.push(row);
                self.emitted.add(1);
                continue;
            }

            let new_group = self.update_group(&prefix, row)?;

            if remaining.is_empty() {
                if new_group {
                    self.selection.push(row);
                    self.emitted.add(1);
                }
                continue;
            }

            if !self.group_set.insert_row(self.hashes[row], &remaining, row)? {
                continue;
            }
            self.selection.push(row);
            self.emitted.add(1);

            if self.limits.check(self.group_set.usage())? == LimitCheck::Passthrough {
                let usage = self.group_set.usage();
                warn!(
                    rows = usage.rows,
                    bytes = usage.bytes,
                    limits = %self.limits,
                    "distinct group set exceeded limits, passing remaining rows through"
                );
                self.passthrough = true;
            }
        }

        output.select_from_other(input, &self.selection)?;

        if self.emitted.hint_reached() {
            debug!(emitted = self.emitted.count(), "sorted distinct limit hint reached");
            return Ok(PollExecute::Exhausted);
        }

        if self.selection.is_empty() {
            return Ok(PollExecute::NeedsMore);
        }

        Ok(PollExecute::Ready)
    }

    /// Check if `row` starts a new group, resetting group state if it does.
    fn update_group(&mut self, prefix: &[&Array], row: usize) -> Result<bool> {
        if let Some(key) = &self.group_key {
            let same = key
                .iter()
                .zip(prefix)
                .all(|(val, arr)| arr.scalar_eq(row, val));
            if same {
                return Ok(false);
            }
        }

        let key = prefix
            .iter()
            .map(|arr| arr.get_scalar(row))
            .collect::<Result<Vec<_>>>()?;
        self.group_key = Some(key);
        self.group_set.clear();

        Ok(true)
    }
}
