//! Duplicate row elimination.
//!
//! Two strategies are provided. The hash strategy keeps a fingerprint for
//! every distinct row seen. The sorted strategy relies on the input being
//! sorted on a prefix of the distinct columns, and only keeps state for the
//! current group of rows sharing that prefix.

pub mod fingerprint_set;
pub mod hash_distinct;
pub mod size_limits;
pub mod sorted_distinct;

use std::task::Context;

use hash_distinct::HashDistinctState;
use rowsieve_error::{DbError, Result};
use size_limits::{SetUsage, SizeLimits};
use sorted_distinct::SortedDistinctState;

use super::{BaseOperator, ExecuteOperator, ExecutionProperties, PollExecute, PollFinalize};
use crate::arrays::batch::Batch;
use crate::arrays::datatype::DataType;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};

/// Counts rows emitted against an optional limit hint.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EmittedRows {
    count: usize,
    limit_hint: Option<usize>,
}

impl EmittedRows {
    pub(crate) const fn new(limit_hint: Option<usize>) -> Self {
        EmittedRows {
            count: 0,
            limit_hint,
        }
    }

    pub(crate) const fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn add(&mut self, n: usize) {
        self.count += n;
    }

    pub(crate) fn hint_reached(&self) -> bool {
        self.limit_hint.is_some_and(|hint| self.count >= hint)
    }
}

/// How duplicates are removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistinctStrategy {
    /// Track every distinct fingerprint.
    Hash,
    /// Input is sorted on `prefix_columns`, only track a single group at a
    /// time.
    SortedPrefix {
        /// Sorted columns, in sort order.
        prefix_columns: Vec<usize>,
        /// Distinct columns not covered by the prefix.
        remaining_columns: Vec<usize>,
    },
}

impl DistinctStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::SortedPrefix { .. } => "sorted_prefix",
        }
    }
}

#[derive(Debug)]
pub enum DistinctPartitionState {
    Hash(HashDistinctState),
    Sorted(SortedDistinctState),
}

impl DistinctPartitionState {
    pub fn set_usage(&self) -> SetUsage {
        match self {
            Self::Hash(state) => state.set_usage(),
            Self::Sorted(state) => state.set_usage(),
        }
    }

    pub fn emitted(&self) -> usize {
        match self {
            Self::Hash(state) => state.emitted(),
            Self::Sorted(state) => state.emitted(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        match self {
            Self::Hash(state) => state.is_passthrough(),
            Self::Sorted(state) => state.is_passthrough(),
        }
    }
}

/// Removes duplicate rows based on a set of columns.
///
/// Columns not part of the distinct set are carried along from the first row
/// with a given fingerprint.
#[derive(Debug)]
pub struct PhysicalDistinct {
    pub(crate) datatypes: Vec<DataType>,
    /// Indices of the distinct columns, sorted ascending.
    pub(crate) distinct_columns: Vec<usize>,
    pub(crate) strategy: DistinctStrategy,
    pub(crate) limits: SizeLimits,
    pub(crate) limit_hint: Option<usize>,
    /// If this operator produces the final result and so must only run on a
    /// single partition.
    pub(crate) requires_single_partition: bool,
}

impl PhysicalDistinct {
    pub fn try_new(
        datatypes: impl Into<Vec<DataType>>,
        distinct_columns: Vec<usize>,
        strategy: DistinctStrategy,
        limits: SizeLimits,
        limit_hint: Option<usize>,
        requires_single_partition: bool,
    ) -> Result<Self> {
        let datatypes = datatypes.into();

        if let Some(&idx) = distinct_columns.iter().find(|&&idx| idx >= datatypes.len()) {
            return Err(DbError::new("Distinct column index out of range")
                .with_field("idx", idx)
                .with_field("num_columns", datatypes.len()));
        }

        if let DistinctStrategy::SortedPrefix {
            prefix_columns,
            remaining_columns,
        } = &strategy
        {
            if prefix_columns.is_empty() {
                return Err(DbError::new("Sorted distinct requires a non-empty prefix"));
            }
            let covers = prefix_columns
                .iter()
                .chain(remaining_columns)
                .all(|idx| distinct_columns.contains(idx));
            if !covers || prefix_columns.len() + remaining_columns.len() != distinct_columns.len()
            {
                return Err(DbError::new(
                    "Sorted distinct prefix and remaining columns must partition the distinct columns",
                ));
            }
        }

        Ok(PhysicalDistinct {
            datatypes,
            distinct_columns,
            strategy,
            limits,
            limit_hint: limit_hint.filter(|&hint| hint > 0),
            requires_single_partition,
        })
    }

    pub fn strategy(&self) -> &DistinctStrategy {
        &self.strategy
    }

    fn create_partition_state(&self) -> DistinctPartitionState {
        match &self.strategy {
            DistinctStrategy::Hash => DistinctPartitionState::Hash(HashDistinctState::new(
                self.distinct_columns.clone(),
                self.limits,
                self.limit_hint,
            )),
            DistinctStrategy::SortedPrefix {
                prefix_columns,
                remaining_columns,
            } => DistinctPartitionState::Sorted(SortedDistinctState::new(
                prefix_columns.clone(),
                remaining_columns.clone(),
                self.limits,
                self.limit_hint,
            )),
        }
    }
}

impl BaseOperator for PhysicalDistinct {
    const OPERATOR_NAME: &str = "Distinct";

    type OperatorState = ();

    fn create_operator_state(&self, _props: ExecutionProperties) -> Result<Self::OperatorState> {
        Ok(())
    }

    fn output_types(&self) -> &[DataType] {
        &self.datatypes
    }
}

impl ExecuteOperator for PhysicalDistinct {
    type PartitionExecuteState = DistinctPartitionState;

    fn create_partition_execute_states(
        &self,
        _operator_state: &Self::OperatorState,
        _props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<Self::PartitionExecuteState>> {
        if self.requires_single_partition && partitions != 1 {
            return Err(
                DbError::new("Final distinct must be executed on a single partition")
                    .with_field("partitions", partitions),
            );
        }

        Ok((0..partitions)
            .map(|_| self.create_partition_state())
            .collect())
    }

    fn poll_execute(
        &self,
        _cx: &mut Context,
        _operator_state: &Self::OperatorState,
        state: &mut Self::PartitionExecuteState,
        input: &mut Batch,
        output: &mut Batch,
    ) -> Result<PollExecute> {
        match state {
            DistinctPartitionState::Hash(state) => state.process(input, output),
            DistinctPartitionState::Sorted(state) => state.process(input, output),
        }
    }

    fn poll_finalize_execute(
        &self,
        _cx: &mut Context,
        _operator_state: &Self::OperatorState,
        _state: &mut Self::PartitionExecuteState,
    ) -> Result<PollFinalize> {
        Ok(PollFinalize::Finalized)
    }
}

impl Explainable for PhysicalDistinct {
    fn explain_entry(&self, conf: ExplainConfig) -> ExplainEntry {
        let mut ent = ExplainEntry::new(Self::OPERATOR_NAME)
            .with_values("columns", &self.distinct_columns)
            .with_value("strategy", self.strategy.name());

        if let DistinctStrategy::SortedPrefix { prefix_columns, .. } = &self.strategy {
            ent = ent.with_values("sort_prefix", prefix_columns);
        }
        if let Some(hint) = self.limit_hint {
            ent = ent.with_value("limit_hint", hint);
        }
        if conf.verbose {
            ent = ent
                .with_value("limits", self.limits)
                .with_value("single_partition", self.requires_single_partition);
        }

        ent
    }
}
