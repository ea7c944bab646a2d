use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;
use rayon::ThreadPool;
use rowsieve_core::execution::pipeline::partition_pipeline::ExecutablePartitionPipeline;
use rowsieve_core::runtime::pipeline::ErrorSink;
use tracing::trace;

#[derive(Debug)]
pub(crate) struct TaskState {
    /// The partition pipeline we're operating on.
    ///
    /// Taken once the pipeline completes or errors. Wakers held by operators
    /// may outlive the pipeline, executing a task without a pipeline does
    /// nothing.
    pub(crate) pipeline: Mutex<Option<ExecutablePartitionPipeline>>,
    /// Error sink for any errors that occur during execution.
    pub(crate) errors: Arc<dyn ErrorSink>,
    /// The threadpool to execute on.
    pub(crate) pool: Arc<ThreadPool>,
}

impl Wake for TaskState {
    fn wake(self: Arc<Self>) {
        let pool = self.pool.clone();
        let task = PartitionPipelineTask { state: self };
        pool.spawn(|| task.execute());
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Arc::clone(self).wake();
    }
}

/// Task for executing a partition pipeline.
#[derive(Debug)]
pub struct PartitionPipelineTask {
    state: Arc<TaskState>,
}

impl PartitionPipelineTask {
    pub(crate) fn from_task_state(state: Arc<TaskState>) -> Self {
        PartitionPipelineTask { state }
    }

    pub(crate) fn execute(self) {
        let mut guard = self.state.pipeline.lock();
        let pipeline = match guard.as_mut() {
            Some(pipeline) => pipeline,
            None => return,
        };

        let waker: Waker = self.state.clone().into();
        let mut cx = Context::from_waker(&waker);

        match pipeline.poll_execute(&mut cx) {
            Poll::Ready(Ok(())) => {
                // We'll never execute again.
                let profile = *pipeline.profile();
                trace!(?profile, "partition pipeline completed");
                *guard = None;
                drop(guard);
                self.state.errors.partition_pipeline_complete(profile);
            }
            Poll::Ready(Err(e)) => {
                *guard = None;
                drop(guard);
                self.state.errors.set_error(e);
            }
            Poll::Pending => {
                // Waker was already stored in the pending source or operator,
                // we'll be woken back up when this pipeline can make
                // progress.
            }
        }
    }
}
