use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Wake, Waker};

use rowsieve_error::Result;

use crate::arrays::batch::Batch;
use crate::execution::operators::{
    BaseOperator,
    ExecuteOperator,
    ExecutionProperties,
    PollExecute,
    PollFinalize,
    PollPull,
    PollPush,
    PullOperator,
    PushOperator,
};

pub const fn test_props() -> ExecutionProperties {
    ExecutionProperties { batch_size: 1024 }
}

#[derive(Debug, Default)]
pub struct CountingWaker {
    count: AtomicUsize,
}

impl CountingWaker {
    pub fn wake_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Wake for CountingWaker {
    fn wake(self: Arc<Self>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wrapper around an operator that uses a stub waker that tracks how many times
/// it's woken.
#[derive(Debug)]
pub struct OperatorWrapper<O: BaseOperator> {
    pub waker: Arc<CountingWaker>,
    pub operator: O,
}

impl<O> OperatorWrapper<O>
where
    O: BaseOperator,
{
    pub fn new(operator: O) -> Self {
        OperatorWrapper {
            waker: Arc::new(CountingWaker::default()),
            operator,
        }
    }

    #[track_caller]
    pub fn create_operator_state(&self) -> O::OperatorState {
        self.operator.create_operator_state(test_props()).unwrap()
    }

    fn with_context<T>(&self, f: impl FnOnce(&mut Context) -> T) -> T {
        let waker = Waker::from(self.waker.clone());
        let mut cx = Context::from_waker(&waker);
        f(&mut cx)
    }
}

impl<O> OperatorWrapper<O>
where
    O: ExecuteOperator,
{
    #[track_caller]
    pub fn create_partition_execute_states(
        &self,
        op_state: &O::OperatorState,
        partitions: usize,
    ) -> Vec<O::PartitionExecuteState> {
        self.operator
            .create_partition_execute_states(op_state, test_props(), partitions)
            .unwrap()
    }

    pub fn poll_execute(
        &self,
        op_state: &O::OperatorState,
        state: &mut O::PartitionExecuteState,
        input: &mut Batch,
        output: &mut Batch,
    ) -> Result<PollExecute> {
        self.with_context(|cx| {
            self.operator
                .poll_execute(cx, op_state, state, input, output)
        })
    }

    pub fn poll_finalize_execute(
        &self,
        op_state: &O::OperatorState,
        state: &mut O::PartitionExecuteState,
    ) -> Result<PollFinalize> {
        self.with_context(|cx| self.operator.poll_finalize_execute(cx, op_state, state))
    }
}

impl<O> OperatorWrapper<O>
where
    O: PullOperator,
{
    #[track_caller]
    pub fn create_partition_pull_states(
        &self,
        op_state: &O::OperatorState,
        partitions: usize,
    ) -> Vec<O::PartitionPullState> {
        self.operator
            .create_partition_pull_states(op_state, test_props(), partitions)
            .unwrap()
    }

    pub fn poll_pull(
        &self,
        op_state: &O::OperatorState,
        state: &mut O::PartitionPullState,
        output: &mut Batch,
    ) -> Result<PollPull> {
        self.with_context(|cx| self.operator.poll_pull(cx, op_state, state, output))
    }
}

impl<O> OperatorWrapper<O>
where
    O: PushOperator,
{
    #[track_caller]
    pub fn create_partition_push_states(
        &self,
        op_state: &O::OperatorState,
        partitions: usize,
    ) -> Vec<O::PartitionPushState> {
        self.operator
            .create_partition_push_states(op_state, test_props(), partitions)
            .unwrap()
    }

    pub fn poll_push(
        &self,
        op_state: &O::OperatorState,
        state: &mut O::PartitionPushState,
        input: &mut Batch,
    ) -> Result<PollPush> {
        self.with_context(|cx| self.operator.poll_push(cx, op_state, state, input))
    }

    pub fn poll_finalize_push(
        &self,
        op_state: &O::OperatorState,
        state: &mut O::PartitionPushState,
    ) -> Result<PollFinalize> {
        self.with_context(|cx| self.operator.poll_finalize_push(cx, op_state, state))
    }
}
