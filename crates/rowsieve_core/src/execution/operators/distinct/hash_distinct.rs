use rowsieve_error::Result;
use tracing::{debug, warn};

use super::EmittedRows;
use super::fingerprint_set::FingerprintSet;
use super::size_limits::{LimitCheck, SetUsage, SizeLimits};
use crate::arrays::array::Array;
use crate::arrays::batch::Batch;
use crate::arrays::compute::hash::hash_many_arrays;
use crate::execution::operators::PollExecute;

/// Partition state for deduplicating rows with a set of every fingerprint
/// seen so far.
#[derive(Debug)]
pub struct HashDistinctState {
    /// Indices of the distinct columns.
    columns: Vec<usize>,
    limits: SizeLimits,
    set: FingerprintSet,
    emitted: EmittedRows,
    /// Set once the limits are exceeded in passthrough mode.
    passthrough: bool,
    /// Reusable buffer for row hashes.
    hashes: Vec<u64>,
    /// Reusable buffer for rows to keep.
    selection: Vec<usize>,
}

impl HashDistinctState {
    pub fn new(columns: Vec<usize>, limits: SizeLimits, limit_hint: Option<usize>) -> Self {
        HashDistinctState {
            columns,
            limits,
            set: FingerprintSet::new(),
            emitted: EmittedRows::new(limit_hint),
            passthrough: false,
            hashes: Vec::new(),
            selection: Vec::new(),
        }
    }

    pub fn set_usage(&self) -> SetUsage {
        self.set.usage()
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
        let columns = self
            .columns
            .iter()
            .map(|&idx| input.array(idx))
            .collect::<Result<Vec<&Array>>>()?;

        self.selection.clear();
        if !self.passthrough {
            self.hashes.resize(num_rows, 0);
            hash_many_arrays(columns.iter().copied(), &mut self.hashes)?;
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

            if !self.set.insert_row(self.hashes[row], &columns, row)? {
                continue;
            }
            self.selection.push(row);
            self.emitted.add(1);

            if self.limits.check(self.set.usage())? == LimitCheck::Passthrough {
                let usage = self.set.usage();
                warn!(
                    rows = usage.rows,
                    bytes = usage.bytes,
                    limits = %self.limits,
                    "distinct set exceeded limits, passing remaining rows through"
                );
                self.passthrough = true;
            }
        }

        output.select_from_other(input, &self.selection)?;

        if self.emitted.hint_reached() {
            debug!(emitted = self.emitted.count(), "distinct limit hint reached");
            return Ok(PollExecute::Exhausted);
        }

        if self.selection.is_empty() {
            return Ok(PollExecute::NeedsMore);
        }

        Ok(PollExecute::Ready)
    }
}
