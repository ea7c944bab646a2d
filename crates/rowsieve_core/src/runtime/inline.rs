use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Wake, Waker};

use rowsieve_error::DbError;
use tracing::{debug, trace};

use super::pipeline::{ErrorSink, PipelineRuntime, QueryHandle};
use crate::execution::cancel::{CancelReason, CancellationToken};
use crate::execution::pipeline::partition_pipeline::ExecutablePartitionPipeline;

/// Runtime executing every partition pipeline on the calling thread.
///
/// Pipelines are polled round robin until they all complete. Execution
/// happens entirely within `spawn_pipelines`, the returned handle refers to
/// a finished query. Useful for deterministic tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineRuntime {
    partitions: usize,
}

impl InlineRuntime {
    pub fn new(partitions: usize) -> Self {
        InlineRuntime {
            partitions: partitions.max(1),
        }
    }
}

impl Default for InlineRuntime {
    fn default() -> Self {
        Self::new(1)
    }
}

impl PipelineRuntime for InlineRuntime {
    fn default_partitions(&self) -> usize {
        self.partitions
    }

    fn spawn_pipelines(
        &self,
        pipelines: Vec<ExecutablePartitionPipeline>,
        errors: Arc<dyn ErrorSink>,
    ) -> Arc<dyn QueryHandle> {
        let handle = InlineQueryHandle {
            tokens: pipelines.iter().map(|p| p.token().clone()).collect(),
        };
        run_round_robin(pipelines, errors.as_ref());
        Arc::new(handle)
    }
}

#[derive(Debug)]
struct InlineQueryHandle {
    tokens: Vec<CancellationToken>,
}

impl QueryHandle for InlineQueryHandle {
    fn cancel(&self) {
        for token in &self.tokens {
            token.cancel(CancelReason::QueryCanceled);
        }
    }
}

/// Waker that only counts how many times it's been woken.
#[derive(Debug, Default)]
struct WakeCounter {
    count: AtomicUsize,
}

impl WakeCounter {
    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Wake for WakeCounter {
    fn wake(self: Arc<Self>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn run_round_robin(mut pending: Vec<ExecutablePartitionPipeline>, errors: &dyn ErrorSink) {
    let wakes = Arc::new(WakeCounter::default());
    let waker = Waker::from(wakes.clone());
    let mut cx = Context::from_waker(&waker);

    debug!(num_pipelines = pending.len(), "running pipelines inline");

    let mut round = 0;
    while !pending.is_empty() {
        let wakes_before = wakes.count();
        let mut completed_any = false;
        let mut still_pending = Vec::with_capacity(pending.len());

        for mut pipeline in pending.drain(..) {
            match pipeline.poll_execute(&mut cx) {
                Poll::Ready(Ok(())) => {
                    errors.partition_pipeline_complete(*pipeline.profile());
                    completed_any = true;
                }
                Poll::Ready(Err(e)) => {
                    // Remaining pipelines are dropped.
                    errors.set_error(e);
                    return;
                }
                Poll::Pending => still_pending.push(pipeline),
            }
        }
        pending = still_pending;
        round += 1;

        trace!(round, pending = pending.len(), "finished inline round");

        // Nothing else can wake the pipelines.
        if !pending.is_empty() && !completed_any && wakes.count() == wakes_before {
            errors.set_error(
                DbError::new("Inline execution stalled with pending pipelines")
                    .with_field("pending", pending.len()),
            );
            return;
        }
    }
}
