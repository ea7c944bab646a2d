use std::collections::VecDeque;
use std::task::{Context, Waker};

use parking_lot::Mutex;
use rowsieve_error::{DbError, Result};

use super::{
    BaseOperator,
    ExecutionProperties,
    PollFinalize,
    PollPull,
    PollPush,
    PullOperator,
    PushOperator,
};
use crate::arrays::batch::Batch;
use crate::arrays::datatype::DataType;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};

#[derive(Debug)]
pub struct CollapseOperatorState {
    inner: Mutex<CollapseBuffer>,
}

#[derive(Debug)]
struct CollapseBuffer {
    /// Batches pushed but not yet pulled.
    batches: VecDeque<Batch>,
    /// Number of input partitions still pushing.
    ///
    /// Set when the push states are created.
    remaining: Option<usize>,
    /// Waker for the single output partition.
    pull_waker: Option<Waker>,
}

impl CollapseBuffer {
    fn wake_pull(&mut self) {
        if let Some(waker) = self.pull_waker.take() {
            waker.wake();
        }
    }
}

#[derive(Debug)]
pub struct CollapsePushPartitionState {
    finished: bool,
}

#[derive(Debug)]
pub struct CollapsePullPartitionState;

/// Collapse 'n' input partitions into a single output partition.
///
/// The push side is the sink of one pipeline, the pull side is the source of
/// another. Batches are buffered without bound.
#[derive(Debug)]
pub struct PhysicalCollapse {
    pub(crate) datatypes: Vec<DataType>,
}

impl PhysicalCollapse {
    pub fn new(datatypes: impl Into<Vec<DataType>>) -> Self {
        PhysicalCollapse {
            datatypes: datatypes.into(),
        }
    }
}

impl BaseOperator for PhysicalCollapse {
    const OPERATOR_NAME: &str = "Collapse";

    type OperatorState = CollapseOperatorState;

    fn create_operator_state(&self, _props: ExecutionProperties) -> Result<Self::OperatorState> {
        Ok(CollapseOperatorState {
            inner: Mutex::new(CollapseBuffer {
                batches: VecDeque::new(),
                remaining: None,
                pull_waker: None,
            }),
        })
    }

    fn output_types(&self) -> &[DataType] {
        &self.datatypes
    }
}

impl PushOperator for PhysicalCollapse {
    type PartitionPushState = CollapsePushPartitionState;

    fn create_partition_push_states(
        &self,
        operator_state: &Self::OperatorState,
        _props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<Self::PartitionPushState>> {
        let mut inner = operator_state.inner.lock();
        if inner.remaining.is_some() {
            return Err(DbError::new("Collapse push states already created"));
        }
        inner.remaining = Some(partitions);

        Ok((0..partitions)
            .map(|_| CollapsePushPartitionState { finished: false })
            .collect())
    }

    fn poll_push(
        &self,
        _cx: &mut Context,
        operator_state: &Self::OperatorState,
        state: &mut Self::PartitionPushState,
        input: &mut Batch,
    ) -> Result<PollPush> {
        if state.finished {
            return Err(DbError::new("Attempted to push to finished collapse partition"));
        }

        if input.num_rows() == 0 {
            return Ok(PollPush::Pushed);
        }

        let mut inner = operator_state.inner.lock();
        inner.batches.push_back(std::mem::take(input));
        inner.wake_pull();

        Ok(PollPush::Pushed)
    }

    fn poll_finalize_push(
        &self,
        _cx: &mut Context,
        operator_state: &Self::OperatorState,
        state: &mut Self::PartitionPushState,
    ) -> Result<PollFinalize> {
        if state.finished {
            return Ok(PollFinalize::Finalized);
        }
        state.finished = true;

        let mut inner = operator_state.inner.lock();
        let remaining = match inner.remaining.as_mut() {
            Some(remaining) if *remaining > 0 => remaining,
            _ => return Err(DbError::new("Collapse has no remaining inputs to finalize")),
        };
        *remaining -= 1;
        if *remaining == 0 {
            inner.wake_pull();
        }

        Ok(PollFinalize::Finalized)
    }
}

impl PullOperator for PhysicalCollapse {
    type PartitionPullState = CollapsePullPartitionState;

    fn create_partition_pull_states(
        &self,
        _operator_state: &Self::OperatorState,
        _props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<Self::PartitionPullState>> {
        if partitions != 1 {
            return Err(
                DbError::new("Collapse must be pulled from a single partition")
                    .with_field("partitions", partitions),
            );
        }

        Ok(vec![CollapsePullPartitionState])
    }

    fn poll_pull(
        &self,
        cx: &mut Context,
        operator_state: &Self::OperatorState,
        _state: &mut Self::PartitionPullState,
        output: &mut Batch,
    ) -> Result<PollPull> {
        let mut inner = operator_state.inner.lock();

        if let Some(batch) = inner.batches.pop_front() {
            *output = batch;
            return Ok(PollPull::HasMore);
        }

        if inner.remaining == Some(0) {
            return Ok(PollPull::Exhausted);
        }

        inner.pull_waker = Some(cx.waker().clone());
        Ok(PollPull::Pending)
    }
}

impl Explainable for PhysicalCollapse {
    fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
        ExplainEntry::new(Self::OPERATOR_NAME)
    }
}
