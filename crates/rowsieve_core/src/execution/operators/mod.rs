//! Implementations of physical operators in an execution pipeline.

pub mod batch_sink;
pub mod batch_source;
pub mod collapse;
pub mod distinct;

#[cfg(test)]
pub(crate) mod testutil;

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use std::task::Context;

use rowsieve_error::{DbError, Result};

use crate::arrays::batch::Batch;
use crate::arrays::datatype::DataType;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};

/// Properties shared by all operators during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionProperties {
    /// Target number of rows per batch.
    pub batch_size: usize,
}

/// Poll result for operator execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExecute {
    /// Operator accepted input and wrote its output to the output batch.
    ///
    /// The next poll should be with a new input batch.
    Ready,
    /// Push pending. Waker stored, re-execute with the exact same state.
    Pending,
    /// Operator needs more input before it'll produce any meaningful output.
    ///
    /// The output batch should be ignored.
    NeedsMore,
    /// Operator wrote its final output to the output batch and won't accept
    /// any more input.
    ///
    /// The output batch may contain rows.
    Exhausted,
}

/// Poll result for operator finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFinalize {
    /// Operator finalized, execution of this operator finished.
    ///
    /// `poll_execute` will not be called after this is returned.
    Finalized,
    /// Finalize pending, re-execute with the same state.
    Pending,
}

/// Result of a pull from a source operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPull {
    /// A batch was written to the output, and there may be more.
    HasMore,
    /// A batch could not be be retrieved right now.
    ///
    /// A waker will be registered for a later wakeup to try to pull the next
    /// batch.
    Pending,
    /// The operator has been exhausted for this partition. Nothing was written
    /// to the output.
    Exhausted,
}

/// Result of a push to a sink operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPush {
    /// Batch was successfully pushed.
    Pushed,
    /// Batch could not be processed right now.
    ///
    /// A waker will be registered for a later wakeup. This same batch should be
    /// pushed at that time.
    Pending,
}

pub trait BaseOperator: Sync + Send + Debug + Explainable + 'static {
    const OPERATOR_NAME: &str;

    /// State shared across all partitions.
    type OperatorState: Sync + Send + 'static;

    fn create_operator_state(&self, props: ExecutionProperties) -> Result<Self::OperatorState>;

    fn output_types(&self) -> &[DataType];
}

/// Operators that sit in the middle of a pipeline, accepting a batch and
/// producing a batch.
pub trait ExecuteOperator: BaseOperator {
    type PartitionExecuteState: Send + 'static;

    fn create_partition_execute_states(
        &self,
        operator_state: &Self::OperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<Self::PartitionExecuteState>>;

    fn poll_execute(
        &self,
        cx: &mut Context,
        operator_state: &Self::OperatorState,
        state: &mut Self::PartitionExecuteState,
        input: &mut Batch,
        output: &mut Batch,
    ) -> Result<PollExecute>;

    /// Indicates this partition will receive no more input.
    fn poll_finalize_execute(
        &self,
        cx: &mut Context,
        operator_state: &Self::OperatorState,
        state: &mut Self::PartitionExecuteState,
    ) -> Result<PollFinalize>;
}

/// Operators that act as the source of a pipeline.
pub trait PullOperator: BaseOperator {
    type PartitionPullState: Send + 'static;

    fn create_partition_pull_states(
        &self,
        operator_state: &Self::OperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<Self::PartitionPullState>>;

    fn poll_pull(
        &self,
        cx: &mut Context,
        operator_state: &Self::OperatorState,
        state: &mut Self::PartitionPullState,
        output: &mut Batch,
    ) -> Result<PollPull>;
}

/// Operators that act as the sink of a pipeline.
pub trait PushOperator: BaseOperator {
    type PartitionPushState: Send + 'static;

    fn create_partition_push_states(
        &self,
        operator_state: &Self::OperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<Self::PartitionPushState>>;

    /// Push a batch for this partition.
    ///
    /// The operator may take ownership of the batch's contents.
    fn poll_push(
        &self,
        cx: &mut Context,
        operator_state: &Self::OperatorState,
        state: &mut Self::PartitionPushState,
        input: &mut Batch,
    ) -> Result<PollPush>;

    /// Finalize pushing to this partition.
    fn poll_finalize_push(
        &self,
        cx: &mut Context,
        operator_state: &Self::OperatorState,
        state: &mut Self::PartitionPushState,
    ) -> Result<PollFinalize>;
}

/// Type erased operator state, shared by every partition.
pub type AnyOperatorState = Arc<dyn Any + Sync + Send>;

/// Type erased partition state.
pub type AnyPartitionState = Box<dyn Any + Send>;

fn downcast_operator_state<T: 'static>(state: &AnyOperatorState) -> Result<&T> {
    let state: &(dyn Any + Sync + Send) = state.as_ref();
    state
        .downcast_ref::<T>()
        .ok_or_else(|| DbError::new("Unexpected operator state type"))
}

fn downcast_partition_state<T: 'static>(state: &mut AnyPartitionState) -> Result<&mut T> {
    let state: &mut (dyn Any + Send) = state.as_mut();
    state
        .downcast_mut::<T>()
        .ok_or_else(|| DbError::new("Unexpected partition state type"))
}

fn erase_states<S: Send + 'static>(states: Vec<S>) -> Vec<AnyPartitionState> {
    states
        .into_iter()
        .map(|s| Box::new(s) as AnyPartitionState)
        .collect()
}

/// Object safe wrapper around `ExecuteOperator` allowing operators of
/// different types to be chained in a pipeline.
pub trait AnyExecuteOperator: Sync + Send + Debug {
    fn operator_name(&self) -> &'static str;

    fn explain(&self, conf: ExplainConfig) -> ExplainEntry;

    fn output_types(&self) -> &[DataType];

    fn create_operator_state(&self, props: ExecutionProperties) -> Result<AnyOperatorState>;

    fn create_partition_execute_states(
        &self,
        operator_state: &AnyOperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<AnyPartitionState>>;

    fn poll_execute(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
        input: &mut Batch,
        output: &mut Batch,
    ) -> Result<PollExecute>;

    fn poll_finalize_execute(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
    ) -> Result<PollFinalize>;
}

impl<O: ExecuteOperator> AnyExecuteOperator for O {
    fn operator_name(&self) -> &'static str {
        O::OPERATOR_NAME
    }

    fn explain(&self, conf: ExplainConfig) -> ExplainEntry {
        self.explain_entry(conf)
    }

    fn output_types(&self) -> &[DataType] {
        BaseOperator::output_types(self)
    }

    fn create_operator_state(&self, props: ExecutionProperties) -> Result<AnyOperatorState> {
        let state = BaseOperator::create_operator_state(self, props)?;
        Ok(Arc::new(state))
    }

    fn create_partition_execute_states(
        &self,
        operator_state: &AnyOperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<AnyPartitionState>> {
        let operator_state = downcast_operator_state::<O::OperatorState>(operator_state)?;
        let states =
            ExecuteOperator::create_partition_execute_states(self, operator_state, props, partitions)?;
        Ok(erase_states(states))
    }

    fn poll_execute(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
        input: &mut Batch,
        output: &mut Batch,
    ) -> Result<PollExecute> {
        let operator_state = downcast_operator_state::<O::OperatorState>(operator_state)?;
        let state = downcast_partition_state::<O::PartitionExecuteState>(state)?;
        ExecuteOperator::poll_execute(self, cx, operator_state, state, input, output)
    }

    fn poll_finalize_execute(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
    ) -> Result<PollFinalize> {
        let operator_state = downcast_operator_state::<O::OperatorState>(operator_state)?;
        let state = downcast_partition_state::<O::PartitionExecuteState>(state)?;
        ExecuteOperator::poll_finalize_execute(self, cx, operator_state, state)
    }
}

/// Object safe wrapper around `PullOperator`.
pub trait AnyPullOperator: Sync + Send + Debug {
    fn operator_name(&self) -> &'static str;

    fn explain(&self, conf: ExplainConfig) -> ExplainEntry;

    fn output_types(&self) -> &[DataType];

    fn create_operator_state(&self, props: ExecutionProperties) -> Result<AnyOperatorState>;

    fn create_partition_pull_states(
        &self,
        operator_state: &AnyOperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<AnyPartitionState>>;

    fn poll_pull(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
        output: &mut Batch,
    ) -> Result<PollPull>;
}

impl<O: PullOperator> AnyPullOperator for O {
    fn operator_name(&self) -> &'static str {
        O::OPERATOR_NAME
    }

    fn explain(&self, conf: ExplainConfig) -> ExplainEntry {
        self.explain_entry(conf)
    }

    fn output_types(&self) -> &[DataType] {
        BaseOperator::output_types(self)
    }

    fn create_operator_state(&self, props: ExecutionProperties) -> Result<AnyOperatorState> {
        let state = BaseOperator::create_operator_state(self, props)?;
        Ok(Arc::new(state))
    }

    fn create_partition_pull_states(
        &self,
        operator_state: &AnyOperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<AnyPartitionState>> {
        let operator_state = downcast_operator_state::<O::OperatorState>(operator_state)?;
        let states =
            PullOperator::create_partition_pull_states(self, operator_state, props, partitions)?;
        Ok(erase_states(states))
    }

    fn poll_pull(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
        output: &mut Batch,
    ) -> Result<PollPull> {
        let operator_state = downcast_operator_state::<O::OperatorState>(operator_state)?;
        let state = downcast_partition_state::<O::PartitionPullState>(state)?;
        PullOperator::poll_pull(self, cx, operator_state, state, output)
    }
}

/// Object safe wrapper around `PushOperator`.
pub trait AnyPushOperator: Sync + Send + Debug {
    fn operator_name(&self) -> &'static str;

    fn explain(&self, conf: ExplainConfig) -> ExplainEntry;

    fn create_operator_state(&self, props: ExecutionProperties) -> Result<AnyOperatorState>;

    fn create_partition_push_states(
        &self,
        operator_state: &AnyOperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<AnyPartitionState>>;

    fn poll_push(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
        input: &mut Batch,
    ) -> Result<PollPush>;

    fn poll_finalize_push(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
    ) -> Result<PollFinalize>;
}

impl<O: PushOperator> AnyPushOperator for O {
    fn operator_name(&self) -> &'static str {
        O::OPERATOR_NAME
    }

    fn explain(&self, conf: ExplainConfig) -> ExplainEntry {
        self.explain_entry(conf)
    }

    fn create_operator_state(&self, props: ExecutionProperties) -> Result<AnyOperatorState> {
        let state = BaseOperator::create_operator_state(self, props)?;
        Ok(Arc::new(state))
    }

    fn create_partition_push_states(
        &self,
        operator_state: &AnyOperatorState,
        props: ExecutionProperties,
        partitions: usize,
    ) -> Result<Vec<AnyPartitionState>> {
        let operator_state = downcast_operator_state::<O::OperatorState>(operator_state)?;
        let states =
            PushOperator::create_partition_push_states(self, operator_state, props, partitions)?;
        Ok(erase_states(states))
    }

    fn poll_push(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
        input: &mut Batch,
    ) -> Result<PollPush> {
        let operator_state = downcast_operator_state::<O::OperatorState>(operator_state)?;
        let state = downcast_partition_state::<O::PartitionPushState>(state)?;
        PushOperator::poll_push(self, cx, operator_state, state, input)
    }

    fn poll_finalize_push(
        &self,
        cx: &mut Context,
        operator_state: &AnyOperatorState,
        state: &mut AnyPartitionState,
    ) -> Result<PollFinalize> {
        let operator_state = downcast_operator_state::<O::OperatorState>(operator_state)?;
        let state = downcast_partition_state::<O::PartitionPushState>(state)?;
        PushOperator::poll_finalize_push(self, cx, operator_state, state)
    }
}
