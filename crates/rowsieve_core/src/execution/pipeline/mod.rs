//! Executable pipelines.
//!
//! A query is made up of one or more pipelines. Each pipeline is split into
//! partition pipelines that run independently of each other, one per lane.

pub mod partition_pipeline;

use std::sync::Arc;

use partition_pipeline::{ExecutablePartitionPipeline, PartitionOperator, PartitionPipelineInfo};
use rowsieve_error::{DbError, OptionExt, Result};
use tracing::debug;

use super::cancel::CancellationToken;
use super::operators::collapse::PhysicalCollapse;
use super::operators::{
    AnyExecuteOperator,
    AnyOperatorState,
    AnyPartitionState,
    AnyPullOperator,
    AnyPushOperator,
    ExecutionProperties,
};
use crate::arrays::datatype::DataType;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipelineId(pub usize);

/// A pipeline represents execution across a sequence of operators.
///
/// All partition pipelines do the same work across the same operators, just
/// on a different lane.
#[derive(Debug)]
pub struct ExecutablePipeline {
    pub(crate) pipeline_id: PipelineId,
    pub(crate) partitions: Vec<ExecutablePartitionPipeline>,
}

impl ExecutablePipeline {
    pub fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_pipelines(&self) -> &[ExecutablePartitionPipeline] {
        &self.partitions
    }

    /// Names of the operators in this pipeline, source and sink included.
    pub fn operator_names(&self) -> Vec<&'static str> {
        self.partitions
            .first()
            .map(|p| p.operator_names())
            .unwrap_or_default()
    }

    pub fn into_partition_pipeline_iter(self) -> impl Iterator<Item = ExecutablePartitionPipeline> {
        self.partitions.into_iter()
    }
}

impl Explainable for ExecutablePipeline {
    fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
        ExplainEntry::new("Pipeline")
            .with_value("id", self.pipeline_id.0)
            .with_value("partitions", self.num_partitions())
            .with_values("operators", self.operator_names())
    }
}

/// All pipelines for a query along with the token for canceling it.
#[derive(Debug)]
pub struct QueryPipelines {
    /// Pipelines ordered from upstream to downstream.
    pub pipelines: Vec<ExecutablePipeline>,
    pub token: CancellationToken,
}

impl QueryPipelines {
    pub fn into_partition_pipelines(self) -> Vec<ExecutablePartitionPipeline> {
        self.pipelines
            .into_iter()
            .flat_map(|p| p.into_partition_pipeline_iter())
            .collect()
    }
}

/// An operator with its shared state and a state for every partition.
#[derive(Debug)]
struct StagedOperator<O: ?Sized> {
    operator: Arc<O>,
    operator_state: AnyOperatorState,
    partition_states: Vec<AnyPartitionState>,
}

impl<O: ?Sized> StagedOperator<O> {
    fn try_new(
        operator: Arc<O>,
        operator_state: AnyOperatorState,
        partition_states: Vec<AnyPartitionState>,
        partitions: usize,
    ) -> Result<Self> {
        if partition_states.len() != partitions {
            return Err(DbError::new("Operator created wrong number of partition states")
                .with_field("expected", partitions)
                .with_field("got", partition_states.len()));
        }
        Ok(StagedOperator {
            operator,
            operator_state,
            partition_states,
        })
    }

    fn into_partition_operators(self) -> impl Iterator<Item = PartitionOperator<O>> {
        let StagedOperator {
            operator,
            operator_state,
            partition_states,
        } = self;

        partition_states
            .into_iter()
            .map(move |partition_state| PartitionOperator {
                operator: operator.clone(),
                operator_state: operator_state.clone(),
                partition_state,
            })
    }
}

#[derive(Debug)]
struct PipelineSegment {
    partitions: usize,
    source: StagedOperator<dyn AnyPullOperator>,
    operators: Vec<StagedOperator<dyn AnyExecuteOperator>>,
    output_types: Vec<DataType>,
}

#[derive(Debug)]
struct FinishedSegment {
    segment: PipelineSegment,
    sink: StagedOperator<dyn AnyPushOperator>,
}

impl FinishedSegment {
    fn into_pipeline(self, pipeline_id: PipelineId, tokens: Vec<CancellationToken>) -> ExecutablePipeline {
        let FinishedSegment { segment, sink } = self;

        let mut lanes: Vec<Vec<_>> = (0..segment.partitions)
            .map(|_| Vec::with_capacity(segment.operators.len()))
            .collect();
        for operator in segment.operators {
            for (lane, partition_op) in lanes.iter_mut().zip(operator.into_partition_operators()) {
                lane.push(partition_op);
            }
        }

        let partitions = segment
            .source
            .into_partition_operators()
            .zip(lanes)
            .zip(sink.into_partition_operators())
            .zip(tokens)
            .enumerate()
            .map(|(partition, (((source, operators), sink), token))| {
                let info = PartitionPipelineInfo {
                    pipeline: pipeline_id,
                    partition,
                };
                ExecutablePartitionPipeline::new(info, token, source, operators, sink)
            })
            .collect();

        ExecutablePipeline {
            pipeline_id,
            partitions,
        }
    }
}

/// Builds the pipelines for a query.
///
/// Operators are pushed onto the current pipeline across all of its lanes.
/// Collapsing to a single partition ends the current pipeline and starts a
/// new one reading from the collapsed output.
#[derive(Debug)]
pub struct PipelineBuilder {
    props: ExecutionProperties,
    finished: Vec<FinishedSegment>,
    current: PipelineSegment,
}

impl PipelineBuilder {
    /// Create a new builder reading from `source` across `partitions` lanes.
    pub fn try_new<S>(props: ExecutionProperties, source: S, partitions: usize) -> Result<Self>
    where
        S: AnyPullOperator + 'static,
    {
        if partitions == 0 {
            return Err(DbError::new("Pipeline must have at least one partition"));
        }

        let source: Arc<dyn AnyPullOperator> = Arc::new(source);
        let operator_state = source.create_operator_state(props)?;
        let states = source.create_partition_pull_states(&operator_state, props, partitions)?;
        let output_types = source.output_types().to_vec();

        Ok(PipelineBuilder {
            props,
            finished: Vec::new(),
            current: PipelineSegment {
                partitions,
                source: StagedOperator::try_new(source, operator_state, states, partitions)?,
                operators: Vec::new(),
                output_types,
            },
        })
    }

    pub fn props(&self) -> ExecutionProperties {
        self.props
    }

    /// Number of lanes in the current pipeline.
    pub fn partitions(&self) -> usize {
        self.current.partitions
    }

    /// Output types of the last operator in the current pipeline.
    pub fn output_types(&self) -> &[DataType] {
        &self.current.output_types
    }

    /// Push an operator onto every lane of the current pipeline.
    pub fn push_operator<O>(&mut self, operator: O) -> Result<()>
    where
        O: AnyExecuteOperator + 'static,
    {
        let operator: Arc<dyn AnyExecuteOperator> = Arc::new(operator);
        let partitions = self.current.partitions;
        let operator_state = operator.create_operator_state(self.props)?;
        let states =
            operator.create_partition_execute_states(&operator_state, self.props, partitions)?;

        self.current.output_types = operator.output_types().to_vec();
        self.current
            .operators
            .push(StagedOperator::try_new(operator, operator_state, states, partitions)?);

        Ok(())
    }

    /// Ends the current pipeline with a collapse, starting a new pipeline with
    /// a single lane reading everything the previous lanes produce.
    pub fn collapse_to_single_partition(&mut self) -> Result<()> {
        let collapse = Arc::new(PhysicalCollapse::new(self.current.output_types.clone()));
        let push: Arc<dyn AnyPushOperator> = collapse.clone();
        let pull: Arc<dyn AnyPullOperator> = collapse;

        let from = self.current.partitions;
        let operator_state = push.create_operator_state(self.props)?;
        let push_states = push.create_partition_push_states(&operator_state, self.props, from)?;
        let pull_states = pull.create_partition_pull_states(&operator_state, self.props, 1)?;

        debug!(from, "collapsing pipeline to a single partition");

        let next = PipelineSegment {
            partitions: 1,
            source: StagedOperator::try_new(pull, operator_state.clone(), pull_states, 1)?,
            operators: Vec::new(),
            output_types: self.current.output_types.clone(),
        };
        let segment = std::mem::replace(&mut self.current, next);
        let sink = StagedOperator::try_new(push, operator_state, push_states, from)?;
        self.finished.push(FinishedSegment { segment, sink });

        Ok(())
    }

    /// Finish the current pipeline with `sink`, returning every pipeline for
    /// the query.
    ///
    /// Each lane gets its own cancellation token. Lanes of the last pipeline
    /// are children of the query token. Lanes of an earlier pipeline are
    /// children of the lane token of the pipeline they collapse into, so a
    /// downstream lane that needs no more input stops its upstream lanes.
    pub fn finish<O>(mut self, sink: O) -> Result<QueryPipelines>
    where
        O: AnyPushOperator + 'static,
    {
        let sink: Arc<dyn AnyPushOperator> = Arc::new(sink);
        let partitions = self.current.partitions;
        let operator_state = sink.create_operator_state(self.props)?;
        let states = sink.create_partition_push_states(&operator_state, self.props, partitions)?;
        let sink = StagedOperator::try_new(sink, operator_state, states, partitions)?;
        self.finished.push(FinishedSegment {
            segment: self.current,
            sink,
        });

        let token = CancellationToken::new();
        let mut parent = token.clone();
        let mut pipelines = Vec::with_capacity(self.finished.len());

        for (idx, finished) in self.finished.into_iter().enumerate().rev() {
            let tokens: Vec<_> = (0..finished.segment.partitions)
                .map(|_| parent.child())
                .collect();
            // Only the first pipeline may have more than one lane, everything
            // after reads from a collapse.
            parent = tokens.first().cloned().required("lane token")?;
            pipelines.push(finished.into_pipeline(PipelineId(idx), tokens));
        }
        pipelines.reverse();

        Ok(QueryPipelines { pipelines, token })
    }
}

#[cfg(test)]
mod tests {
    use std::task::{Context, Poll, Waker};

    use super::*;
    use crate::arrays::batch::Batch;
    use crate::arrays::testutil::assert_rows_eq_unordered;
    use crate::execution::cancel::CancelReason;
    use crate::execution::operators::batch_sink::PhysicalBatchSink;
    use crate::execution::operators::batch_source::PhysicalBatchSource;
    use crate::execution::operators::distinct::size_limits::SizeLimits;
    use crate::execution::operators::distinct::{DistinctStrategy, PhysicalDistinct};
    use crate::execution::operators::testutil::{CountingWaker, test_props};
    use crate::generate_batch;

    /// Poll all partition pipelines in order until they all complete.
    fn run_to_completion(pipelines: &mut [ExecutablePartitionPipeline]) -> Result<()> {
        let waker = Waker::from(Arc::new(CountingWaker::default()));
        let mut cx = Context::from_waker(&waker);

        for _ in 0..100 {
            let mut all_done = true;
            for pipeline in pipelines.iter_mut() {
                if pipeline.is_completed() {
                    continue;
                }
                match pipeline.poll_execute(&mut cx) {
                    Poll::Ready(res) => res?,
                    Poll::Pending => all_done = false,
                }
            }
            if all_done {
                return Ok(());
            }
        }

        panic!("pipelines did not complete")
    }

    fn distinct(limit_hint: Option<usize>, final_distinct: bool) -> PhysicalDistinct {
        PhysicalDistinct::try_new(
            [DataType::Int32],
            vec![0],
            DistinctStrategy::Hash,
            SizeLimits::unlimited(),
            limit_hint,
            final_distinct,
        )
        .unwrap()
    }

    #[test]
    fn source_to_sink() {
        let source = PhysicalBatchSource::new(
            [DataType::Int32],
            [generate_batch!([1, 2]), generate_batch!([3])],
        );
        let sink = PhysicalBatchSink::new([DataType::Int32]);
        let collected = sink.collected();

        let builder = PipelineBuilder::try_new(test_props(), source, 1).unwrap();
        let query = builder.finish(sink).unwrap();
        assert_eq!(1, query.pipelines.len());
        assert_eq!(
            vec!["BatchSource", "BatchSink"],
            query.pipelines[0].operator_names()
        );

        let mut pipelines = query.into_partition_pipelines();
        run_to_completion(&mut pipelines).unwrap();

        let profile = pipelines[0].profile();
        assert_eq!(2, profile.batches_pulled);
        assert_eq!(3, profile.rows_pulled);
        assert_eq!(3, profile.rows_pushed);

        assert_rows_eq_unordered(
            &[generate_batch!([1, 2, 3])],
            &collected.take_all(),
        );
    }

    #[test]
    fn exhausted_operator_stops_pulling() {
        let source = PhysicalBatchSource::new(
            [DataType::Int32],
            [generate_batch!([1, 2]), generate_batch!([3]), generate_batch!([4])],
        );
        let sink = PhysicalBatchSink::new([DataType::Int32]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(test_props(), source, 1).unwrap();
        builder.push_operator(distinct(Some(1), false)).unwrap();
        let mut pipelines = builder.finish(sink).unwrap().into_partition_pipelines();

        run_to_completion(&mut pipelines).unwrap();

        assert_eq!(1, pipelines[0].profile().batches_pulled);
        assert_eq!(1, pipelines[0].profile().rows_pushed);
        assert_eq!(
            Some(CancelReason::InputNotNeeded),
            pipelines[0].token().reason()
        );
        assert_eq!(1, collected.num_finished_partitions());
        assert_rows_eq_unordered(&[generate_batch!([1])], &collected.take_all());
    }

    #[test]
    fn collapse_creates_downstream_pipeline() {
        let source = PhysicalBatchSource::new_partitioned(
            [DataType::Int32],
            vec![
                vec![generate_batch!([1, 2])],
                vec![generate_batch!([2, 3])],
            ],
        );
        let sink = PhysicalBatchSink::new([DataType::Int32]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(test_props(), source, 2).unwrap();
        builder.collapse_to_single_partition().unwrap();
        assert_eq!(1, builder.partitions());
        builder.push_operator(distinct(None, true)).unwrap();
        let query = builder.finish(sink).unwrap();

        assert_eq!(2, query.pipelines.len());
        assert_eq!(2, query.pipelines[0].num_partitions());
        assert_eq!(1, query.pipelines[1].num_partitions());
        assert_eq!(
            vec!["Collapse", "Distinct", "BatchSink"],
            query.pipelines[1].operator_names()
        );
        assert_eq!(
            "Pipeline (id = 1, operators = [Collapse, Distinct, BatchSink], partitions = 1)",
            query.pipelines[1]
                .explain_entry(ExplainConfig::default())
                .to_string()
        );

        // Run downstream first to exercise the pending path.
        let mut pipelines = query.into_partition_pipelines();
        pipelines.reverse();
        run_to_completion(&mut pipelines).unwrap();

        assert_rows_eq_unordered(&[generate_batch!([1, 2, 3])], &collected.take_all());
    }

    #[test]
    fn downstream_token_stops_upstream_lanes() {
        let source = PhysicalBatchSource::new_partitioned(
            [DataType::Int32],
            vec![vec![generate_batch!([1])], vec![generate_batch!([2])]],
        );

        let mut builder = PipelineBuilder::try_new(test_props(), source, 2).unwrap();
        builder.collapse_to_single_partition().unwrap();
        let query = builder
            .finish(PhysicalBatchSink::new([DataType::Int32]))
            .unwrap();

        let downstream = query.pipelines[1].partition_pipelines()[0].token().clone();
        downstream.cancel(CancelReason::InputNotNeeded);

        for upstream in query.pipelines[0].partition_pipelines() {
            assert_eq!(Some(CancelReason::InputNotNeeded), upstream.token().reason());
        }

        query.token.cancel(CancelReason::QueryCanceled);
        for upstream in query.pipelines[0].partition_pipelines() {
            assert_eq!(Some(CancelReason::QueryCanceled), upstream.token().reason());
        }
    }

    #[test]
    fn query_canceled_before_pull() {
        let source = PhysicalBatchSource::new([DataType::Int32], [generate_batch!([1])]);
        let builder = PipelineBuilder::try_new(test_props(), source, 1).unwrap();
        let query = builder
            .finish(PhysicalBatchSink::new([DataType::Int32]))
            .unwrap();
        query.token.cancel(CancelReason::QueryCanceled);

        let mut pipelines = query.into_partition_pipelines();
        let err = run_to_completion(&mut pipelines).unwrap_err();
        assert_eq!(rowsieve_error::ErrorKind::Canceled, err.kind());
        assert_eq!(0, pipelines[0].profile().batches_pulled);
    }

    #[test]
    fn final_operator_on_multiple_partitions_errors() {
        let source = PhysicalBatchSource::new([DataType::Int32], [Batch::empty()]);
        let mut builder = PipelineBuilder::try_new(test_props(), source, 2).unwrap();
        builder.push_operator(distinct(None, true)).unwrap_err();
    }
}
