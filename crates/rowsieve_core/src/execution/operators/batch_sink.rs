use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::Context;

use parking_lot::Mutex;
use rowsieve_error::Result;

use super::{BaseOperator, ExecutionProperties, PollFinalize, PollPush, PushOperator};
use crate::arrays::batch::Batch;
use crate::arrays::datatype::DataType;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};

/// Batches collected by a batch sink, keyed by partition.
#[derive(Debug, Default)]
pub struct CollectedBatches {
    partitions: Mutex<BTreeMap<usize, Vec<Batch>>>,
}

impl CollectedBatches {
    /// Take all collected batches, ordered by partition.
    pub fn take_all(&self) -> Vec<Batch> {
        let partitions = std::mem::take(&mut *self.partitions.lock());
        partitions.into_values().flatten().collect()
    }

    /// Take the batches collected for a single partition.
    pub fn take_partition(&self, partition: usize) -> Vec<Batch> {
        self.partitions
            .lock()
            .remove(&partition)
            .unwrap_or_default()
    }

    /// Number of partitions that have finished pushing.
    pub fn num_finished_partitions(&self) -> usize {
        self.partitions.lock().len()
    }
}

#[derive(Debug)]
pub struct BatchSinkPartitionState {
    partition: usize,
    batches: Vec<Batch>,
}

/// Sink that collects every pushed batch in memory.
#[derive(Debug)]
pub struct PhysicalBatchSink {
    pub(crate) datatypes: Vec<DataType>,
    pub(crate) collected: Arc<CollectedBatches>,
}

impl PhysicalBatchSink {
    pub fn new(datatypes: impl Into<Vec<DataType>>) -> Self {
        PhysicalBatchSink {
            datatypes: datatypes.into(),
            collected: Arc::new(CollectedBatches::default()),
        }
    }

    /// Get a handle to the batches this sink collects.
    ///
    /// A partition's batches become visible once that partition is
    /// finalized.
    pub fn collected(&self) -> Arc<CollectedBatches> {
        self.collected.clone()
    }
}

impl BaseOperator for PhysicalBatchSink {
    const OPERATOR_NAME: &str = "BatchSink";

    type OperatorState = ();

    fn create_operator_state(&self, _props: ExecutionProperties) -> Result<Self::OperatorState> {
        Ok(())
    }

    fn output_types(&self) -> &[DataType] {
        &self.datatypes
    }
}

impl PushOperator for PhysicalBatchSink {
    type PartitionPushState = BatchSinkPartitionState;

    fn create_partition_push_states(
        &self,
        _operator_state: &Self::OperatorState,
        _props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<Self::PartitionPushState>> {
        Ok((0..partitions)
            .map(|partition| BatchSinkPartitionState {
                partition,
                batches: Vec::new(),
            })
            .collect())
    }

    fn poll_push(
        &self,
        _cx: &mut Context,
        _operator_state: &Self::OperatorState,
        state: &mut Self::PartitionPushState,
        input: &mut Batch,
    ) -> Result<PollPush> {
        if input.num_rows() > 0 {
            state.batches.push(std::mem::take(input));
        }
        Ok(PollPush::Pushed)
    }

    fn poll_finalize_push(
        &self,
        _cx: &mut Context,
        _operator_state: &Self::OperatorState,
        state: &mut Self::PartitionPushState,
    ) -> Result<PollFinalize> {
        let batches = std::mem::take(&mut state.batches);
        self.collected
            .partitions
            .lock()
            .insert(state.partition, batches);

        Ok(PollFinalize::Finalized)
    }
}

impl Explainable for PhysicalBatchSink {
    fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
        ExplainEntry::new(Self::OPERATOR_NAME)
    }
}
