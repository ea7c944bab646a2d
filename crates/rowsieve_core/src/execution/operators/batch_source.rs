use std::collections::VecDeque;
use std::task::Context;

use parking_lot::Mutex;
use rowsieve_error::{DbError, Result};

use super::{BaseOperator, ExecutionProperties, PollPull, PullOperator};
use crate::arrays::batch::Batch;
use crate::arrays::datatype::DataType;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};

#[derive(Debug)]
pub struct BatchSourcePartitionState {
    batches: VecDeque<Batch>,
    /// Rows of the front batch already handed out.
    offset: usize,
    batch_size: usize,
}

#[derive(Debug)]
enum SourceBatches {
    /// Distribute batches across partitions round robin.
    RoundRobin(Vec<Batch>),
    /// Batches already assigned to partitions.
    Partitioned(Vec<Vec<Batch>>),
}

/// Source of in-memory batches.
///
/// Batches larger than the configured batch size are split when pulled.
/// Batches are handed out once. Creating partition states a second time
/// produces empty partitions.
#[derive(Debug)]
pub struct PhysicalBatchSource {
    pub(crate) datatypes: Vec<DataType>,
    batches: Mutex<Option<SourceBatches>>,
}

impl PhysicalBatchSource {
    /// Create a source that distributes `batches` across however many
    /// partitions it's executed with.
    pub fn new(datatypes: impl Into<Vec<DataType>>, batches: impl IntoIterator<Item = Batch>) -> Self {
        PhysicalBatchSource {
            datatypes: datatypes.into(),
            batches: Mutex::new(Some(SourceBatches::RoundRobin(
                batches.into_iter().collect(),
            ))),
        }
    }

    /// Create a source with batches pre-assigned to partitions.
    ///
    /// The source must be executed with exactly `partitions.len()`
    /// partitions.
    pub fn new_partitioned(
        datatypes: impl Into<Vec<DataType>>,
        partitions: impl IntoIterator<Item = Vec<Batch>>,
    ) -> Self {
        PhysicalBatchSource {
            datatypes: datatypes.into(),
            batches: Mutex::new(Some(SourceBatches::Partitioned(
                partitions.into_iter().collect(),
            ))),
        }
    }
}

impl BaseOperator for PhysicalBatchSource {
    const OPERATOR_NAME: &str = "BatchSource";

    type OperatorState = ();

    fn create_operator_state(&self, _props: ExecutionProperties) -> Result<Self::OperatorState> {
        Ok(())
    }

    fn output_types(&self) -> &[DataType] {
        &self.datatypes
    }
}

impl PullOperator for PhysicalBatchSource {
    type PartitionPullState = BatchSourcePartitionState;

    fn create_partition_pull_states(
        &self,
        _operator_state: &Self::OperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<Self::PartitionPullState>> {
        let mut states: Vec<_> = (0..partitions)
            .map(|_| BatchSourcePartitionState {
                batches: VecDeque::new(),
                offset: 0,
                batch_size: props.batch_size.max(1),
            })
            .collect();

        match self.batches.lock().take() {
            Some(SourceBatches::RoundRobin(batches)) => {
                for (idx, batch) in batches.into_iter().enumerate() {
                    states[idx % partitions].batches.push_back(batch);
                }
            }
            Some(SourceBatches::Partitioned(assigned)) => {
                if assigned.len() != partitions {
                    return Err(DbError::new(
                        "Batch source partition count does not match pipeline partitions",
                    )
                    .with_field("source", assigned.len())
                    .with_field("pipeline", partitions));
                }
                for (state, batches) in states.iter_mut().zip(assigned) {
                    state.batches.extend(batches);
                }
            }
            None => (),
        }

        Ok(states)
    }

    fn poll_pull(
        &self,
        _cx: &mut Context,
        _operator_state: &Self::OperatorState,
        state: &mut Self::PartitionPullState,
        output: &mut Batch,
    ) -> Result<PollPull> {
        let front = match state.batches.front() {
            Some(front) => front,
            None => return Ok(PollPull::Exhausted),
        };

        let num_rows = front.num_rows();
        if state.offset == 0 && num_rows <= state.batch_size {
            if let Some(batch) = state.batches.pop_front() {
                *output = batch;
            }
            return Ok(PollPull::HasMore);
        }

        let end = usize::min(state.offset + state.batch_size, num_rows);
        let sel: Vec<_> = (state.offset..end).collect();
        output.select_from_other(front, &sel)?;

        if end == num_rows {
            state.batches.pop_front();
            state.offset = 0;
        } else {
            state.offset = end;
        }

        Ok(PollPull::HasMore)
    }
}

impl Explainable for PhysicalBatchSource {
    fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
        ExplainEntry::new(Self::OPERATOR_NAME).with_values("datatypes", &self.datatypes)
    }
}
