use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use rowsieve_error::{DbError, Result};
use tracing::trace;

use super::PipelineId;
use crate::arrays::batch::Batch;
use crate::execution::cancel::{CancelReason, CancellationToken};
use crate::execution::operators::{
    AnyExecuteOperator,
    AnyOperatorState,
    AnyPartitionState,
    AnyPullOperator,
    AnyPushOperator,
    PollExecute,
    PollFinalize,
    PollPull,
    PollPush,
};

/// Information about a partition pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPipelineInfo {
    pub pipeline: PipelineId,
    pub partition: usize,
}

/// Counts of batches and rows that moved through a partition pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPipelineProfile {
    pub info: PartitionPipelineInfo,
    /// Batches pulled from the source.
    pub batches_pulled: usize,
    pub rows_pulled: usize,
    /// Batches pushed to the sink.
    pub batches_pushed: usize,
    pub rows_pushed: usize,
}

impl PartitionPipelineProfile {
    fn new(info: PartitionPipelineInfo) -> Self {
        PartitionPipelineProfile {
            info,
            batches_pulled: 0,
            rows_pulled: 0,
            batches_pushed: 0,
            rows_pushed: 0,
        }
    }
}

/// An operator along with its states for a single partition.
#[derive(Debug)]
pub(crate) struct PartitionOperator<O: ?Sized> {
    pub(crate) operator: Arc<O>,
    pub(crate) operator_state: AnyOperatorState,
    pub(crate) partition_state: AnyPartitionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelinePartitionState {
    /// Pull the next batch from the source.
    Pull,
    /// Execute the operator at `op_idx` using the output of the previous
    /// operator (or the source) as input.
    ///
    /// An index equal to the number of operators means the batch is ready to
    /// be pushed to the sink.
    Execute { op_idx: usize },
    /// Push the output of the last operator to the sink.
    Push,
    /// Finalize operators beginning at `op_idx`, then the sink.
    Finalize { op_idx: usize },
    Completed,
}

/// Execution of a pipeline for a single partition.
///
/// Batches flow from the source, through each operator, and into the sink.
pub struct ExecutablePartitionPipeline {
    pub(crate) info: PartitionPipelineInfo,
    /// Token checked before every pull from the source.
    pub(crate) token: CancellationToken,
    pub(crate) source: PartitionOperator<dyn AnyPullOperator>,
    pub(crate) operators: Vec<PartitionOperator<dyn AnyExecuteOperator>>,
    pub(crate) sink: PartitionOperator<dyn AnyPushOperator>,
    /// Batch buffers between operators.
    ///
    /// The first buffer holds the output of the source, the 'i+1'th buffer
    /// holds the output of the 'i'th operator.
    pub(crate) buffers: Vec<Batch>,
    state: PipelinePartitionState,
    /// Index of the last operator that reported it won't accept more input.
    exhausted_idx: Option<usize>,
    profile: PartitionPipelineProfile,
}

impl ExecutablePartitionPipeline {
    pub(crate) fn new(
        info: PartitionPipelineInfo,
        token: CancellationToken,
        source: PartitionOperator<dyn AnyPullOperator>,
        operators: Vec<PartitionOperator<dyn AnyExecuteOperator>>,
        sink: PartitionOperator<dyn AnyPushOperator>,
    ) -> Self {
        let buffers = (0..=operators.len()).map(|_| Batch::empty()).collect();
        ExecutablePartitionPipeline {
            info,
            token,
            source,
            operators,
            sink,
            buffers,
            state: PipelinePartitionState::Pull,
            exhausted_idx: None,
            profile: PartitionPipelineProfile::new(info),
        }
    }

    pub fn info(&self) -> PartitionPipelineInfo {
        self.info
    }

    pub fn profile(&self) -> &PartitionPipelineProfile {
        &self.profile
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_completed(&self) -> bool {
        self.state == PipelinePartitionState::Completed
    }

    /// Names of the operators in this pipeline, source and sink included.
    pub fn operator_names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(self.operators.len() + 2);
        names.push(self.source.operator.operator_name());
        names.extend(self.operators.iter().map(|op| op.operator.operator_name()));
        names.push(self.sink.operator.operator_name());
        names
    }

    /// Execute as much of this partition pipeline as possible.
    ///
    /// Returns `Poll::Ready(Ok(()))` once everything has been pushed to and
    /// finalized in the sink. `Poll::Pending` means some operator stored the
    /// waker, and execution will pick up where it left off on the next call.
    ///
    /// An operator returning `Exhausted` cancels this pipeline's token with
    /// `InputNotNeeded`. Its output still gets pushed through the rest of the
    /// pipeline, then the remaining operators and the sink are finalized.
    pub fn poll_execute(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        trace!(
            pipeline_id = %self.info.pipeline.0,
            partition = %self.info.partition,
            state = ?self.state,
            "executing partition pipeline",
        );

        loop {
            match self.state {
                PipelinePartitionState::Pull => {
                    match self.token.reason() {
                        Some(CancelReason::QueryCanceled) => {
                            return self.fail(CancellationToken::canceled_error());
                        }
                        Some(CancelReason::InputNotNeeded) => {
                            trace!(
                                pipeline_id = %self.info.pipeline.0,
                                partition = %self.info.partition,
                                "input not needed, finalizing",
                            );
                            self.state = PipelinePartitionState::Finalize { op_idx: 0 };
                            continue;
                        }
                        None => (),
                    }

                    let source = &mut self.source;
                    let poll = source.operator.poll_pull(
                        cx,
                        &source.operator_state,
                        &mut source.partition_state,
                        &mut self.buffers[0],
                    );

                    match poll {
                        Ok(PollPull::HasMore) => {
                            self.profile.batches_pulled += 1;
                            self.profile.rows_pulled += self.buffers[0].num_rows();
                            self.state = PipelinePartitionState::Execute { op_idx: 0 };
                        }
                        Ok(PollPull::Pending) => return Poll::Pending,
                        Ok(PollPull::Exhausted) => {
                            self.state = PipelinePartitionState::Finalize { op_idx: 0 };
                        }
                        Err(e) => return self.fail(e),
                    }
                }
                PipelinePartitionState::Execute { op_idx } => {
                    if op_idx == self.operators.len() {
                        self.state = PipelinePartitionState::Push;
                        continue;
                    }

                    let operator = &mut self.operators[op_idx];
                    let (input, output) = get_execute_inout(op_idx + 1, &mut self.buffers);
                    let poll = operator.operator.poll_execute(
                        cx,
                        &operator.operator_state,
                        &mut operator.partition_state,
                        input,
                        output,
                    );
                    let output_rows = self.buffers[op_idx + 1].num_rows();

                    match poll {
                        Ok(PollExecute::Ready) => {
                            self.state = if output_rows == 0 {
                                self.next_input_state()
                            } else {
                                PipelinePartitionState::Execute { op_idx: op_idx + 1 }
                            };
                        }
                        Ok(PollExecute::NeedsMore) => {
                            self.state = self.next_input_state();
                        }
                        Ok(PollExecute::Pending) => return Poll::Pending,
                        Ok(PollExecute::Exhausted) => {
                            trace!(
                                pipeline_id = %self.info.pipeline.0,
                                partition = %self.info.partition,
                                op_idx,
                                "operator exhausted",
                            );
                            let exhausted = self.exhausted_idx.map_or(op_idx, |idx| idx.max(op_idx));
                            self.exhausted_idx = Some(exhausted);
                            self.token.cancel(CancelReason::InputNotNeeded);

                            self.state = if output_rows == 0 {
                                self.next_input_state()
                            } else {
                                PipelinePartitionState::Execute { op_idx: op_idx + 1 }
                            };
                        }
                        Err(e) => return self.fail(e),
                    }
                }
                PipelinePartitionState::Push => {
                    let last = self.buffers.len() - 1;
                    let input = &mut self.buffers[last];
                    let rows = input.num_rows();

                    let sink = &mut self.sink;
                    let poll = sink.operator.poll_push(
                        cx,
                        &sink.operator_state,
                        &mut sink.partition_state,
                        input,
                    );

                    match poll {
                        Ok(PollPush::Pushed) => {
                            self.profile.batches_pushed += 1;
                            self.profile.rows_pushed += rows;
                            self.state = self.next_input_state();
                        }
                        Ok(PollPush::Pending) => return Poll::Pending,
                        Err(e) => return self.fail(e),
                    }
                }
                PipelinePartitionState::Finalize { op_idx } => {
                    if op_idx < self.operators.len() {
                        let operator = &mut self.operators[op_idx];
                        let poll = operator.operator.poll_finalize_execute(
                            cx,
                            &operator.operator_state,
                            &mut operator.partition_state,
                        );

                        match poll {
                            Ok(PollFinalize::Finalized) => {
                                self.state = PipelinePartitionState::Finalize { op_idx: op_idx + 1 };
                            }
                            Ok(PollFinalize::Pending) => return Poll::Pending,
                            Err(e) => return self.fail(e),
                        }
                        continue;
                    }

                    let sink = &mut self.sink;
                    let poll = sink.operator.poll_finalize_push(
                        cx,
                        &sink.operator_state,
                        &mut sink.partition_state,
                    );

                    match poll {
                        Ok(PollFinalize::Finalized) => {
                            trace!(
                                pipeline_id = %self.info.pipeline.0,
                                partition = %self.info.partition,
                                rows_pushed = self.profile.rows_pushed,
                                "partition pipeline completed",
                            );
                            self.state = PipelinePartitionState::Completed;
                        }
                        Ok(PollFinalize::Pending) => return Poll::Pending,
                        Err(e) => return self.fail(e),
                    }
                }
                PipelinePartitionState::Completed => return Poll::Ready(Ok(())),
            }
        }
    }

    /// State to move to once the current batch has been fully handled.
    fn next_input_state(&self) -> PipelinePartitionState {
        match self.exhausted_idx {
            // Operators up to and including the exhausted one are done.
            Some(idx) => PipelinePartitionState::Finalize { op_idx: idx + 1 },
            None => PipelinePartitionState::Pull,
        }
    }

    fn fail(&mut self, error: DbError) -> Poll<Result<()>> {
        self.state = PipelinePartitionState::Completed;
        Poll::Ready(Err(error))
    }
}

impl fmt::Debug for ExecutablePartitionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutablePartitionPipeline")
            .field("info", &self.info)
            .field("operators", &self.operator_names())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn get_execute_inout(op_idx: usize, batches: &mut [Batch]) -> (&mut Batch, &mut Batch) {
    debug_assert!(op_idx != 0);
    debug_assert!(op_idx < batches.len());

    let (before, after) = batches.split_at_mut(op_idx);
    let input = &mut before[op_idx - 1];
    let output = &mut after[0];

    (input, output)
}
