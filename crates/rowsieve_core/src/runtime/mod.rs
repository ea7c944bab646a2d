//! Execution of query pipelines.

pub mod completion;
pub mod inline;
pub mod pipeline;

use std::sync::Arc;

use completion::QueryCompletion;
use pipeline::PipelineRuntime;
use rowsieve_error::Result;
use tracing::debug;

use crate::execution::pipeline::QueryPipelines;
use crate::execution::pipeline::partition_pipeline::PartitionPipelineProfile;

/// Execute all pipelines for a query on `runtime`, blocking until the query
/// completes.
///
/// Returns the profiles for every partition pipeline. The query is canceled
/// on the first error.
pub fn execute_query<R>(runtime: &R, query: QueryPipelines) -> Result<Vec<PartitionPipelineProfile>>
where
    R: PipelineRuntime,
{
    let token = query.token.clone();
    let pipelines = query.into_partition_pipelines();

    debug!(num_partition_pipelines = pipelines.len(), "executing query");

    let completion = Arc::new(QueryCompletion::new(token, pipelines.len()));
    let handle = runtime.spawn_pipelines(pipelines, completion.clone());

    if let Err(e) = completion.wait() {
        handle.cancel();
        return Err(e);
    }

    Ok(completion.take_profiles())
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, VecDeque};
    use std::task::Context;

    use parking_lot::Mutex;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rowsieve_error::ErrorKind;

    use super::*;
    use crate::arrays::array::Array;
    use crate::arrays::batch::Batch;
    use crate::arrays::datatype::DataType;
    use crate::arrays::scalar::ScalarValue;
    use crate::arrays::testutil::{assert_batches_eq, assert_rows_eq_unordered, collect_rows};
    use crate::config::execution::ExecutablePlanConfig;
    use crate::config::session::SessionConfig;
    use crate::execution::cancel::CancelReason;
    use crate::execution::operators::batch_sink::PhysicalBatchSink;
    use crate::execution::operators::batch_source::PhysicalBatchSource;
    use crate::execution::operators::distinct::DistinctStrategy;
    use crate::execution::operators::distinct::size_limits::SizeLimits;
    use crate::execution::operators::{
        BaseOperator,
        ExecutionProperties,
        PollPull,
        PullOperator,
    };
    use crate::execution::pipeline::PipelineBuilder;
    use crate::execution::planner::SortPrefix;
    use crate::execution::planner::plan_distinct::{DistinctPlan, DistinctStep};
    use crate::execution::stream::StreamDescriptor;
    use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
    use crate::generate_batch;
    use crate::runtime::inline::InlineRuntime;

    fn descriptor(partitions: usize) -> StreamDescriptor {
        StreamDescriptor::try_new([("a", DataType::Int32), ("b", DataType::Utf8)], partitions)
            .unwrap()
    }

    fn props() -> ExecutionProperties {
        ExecutionProperties { batch_size: 64 }
    }

    /// Random batches for each lane, with lots of duplicates within and across
    /// lanes.
    fn random_lanes(rng: &mut ChaCha8Rng, lanes: usize) -> Vec<Vec<Batch>> {
        (0..lanes)
            .map(|_| {
                (0..rng.random_range(1..6))
                    .map(|_| {
                        let len = rng.random_range(1..50);
                        let a: Vec<i32> = (0..len).map(|_| rng.random_range(0..10)).collect();
                        let b: Vec<&str> = (0..len).map(|_| ["x", "y"][rng.random_range(0..2)]).collect();
                        Batch::try_from_arrays([Array::from_iter(a), Array::from_iter(b)]).unwrap()
                    })
                    .collect()
            })
            .collect()
    }

    fn distinct_rows(batches: &[Batch]) -> BTreeSet<Vec<String>> {
        collect_rows(batches)
            .into_iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect()
    }

    #[test]
    fn pre_and_final_distinct_across_lanes() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let runtime = InlineRuntime::new(4);

        for _ in 0..5 {
            let lanes = random_lanes(&mut rng, 4);
            let all: Vec<Batch> = lanes.iter().flatten().cloned().collect();

            let input = descriptor(4);
            let pre = DistinctStep::try_new(
                input,
                SizeLimits::unlimited(),
                None,
                ["a", "b"],
                true,
                None,
            )
            .unwrap();
            assert!(pre.output().distinct_columns().is_empty());

            let fin = DistinctStep::try_new(
                pre.output().clone(),
                SizeLimits::unlimited(),
                None,
                ["a", "b"],
                false,
                None,
            )
            .unwrap();
            assert_eq!("[a, b]", fin.output().distinct_columns().to_string());
            assert_eq!(1, fin.output().partitions());

            let source = PhysicalBatchSource::new_partitioned(
                [DataType::Int32, DataType::Utf8],
                lanes,
            );
            let sink = PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]);
            let collected = sink.collected();

            let mut builder = PipelineBuilder::try_new(props(), source, 4).unwrap();
            pre.transform_pipeline(&mut builder).unwrap();
            fin.transform_pipeline(&mut builder).unwrap();
            let query = builder.finish(sink).unwrap();

            let profiles = execute_query(&runtime, query).unwrap();
            assert_eq!(5, profiles.len());

            let out = collected.take_all();
            let expected = distinct_rows(&all);
            assert_eq!(expected, distinct_rows(&out));
            // No duplicates in the output.
            assert_eq!(expected.len(), collect_rows(&out).len());
        }
    }

    #[test]
    fn pre_distinct_only_dedups_within_lane() {
        let lanes = vec![
            vec![generate_batch!([1, 1, 2], ["x", "x", "y"])],
            vec![generate_batch!([1, 2, 2], ["x", "y", "y"])],
        ];

        let pre = DistinctStep::try_new(
            descriptor(2),
            SizeLimits::unlimited(),
            None,
            ["a", "b"],
            true,
            None,
        )
        .unwrap();
        assert!(pre.output().distinct_columns().is_empty());
        assert_eq!(2, pre.output().partitions());

        let source = PhysicalBatchSource::new_partitioned([DataType::Int32, DataType::Utf8], lanes);
        let sink = PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(props(), source, 2).unwrap();
        pre.transform_pipeline(&mut builder).unwrap();
        let query = builder.finish(sink).unwrap();
        assert_eq!(1, query.pipelines.len());

        execute_query(&InlineRuntime::new(2), query).unwrap();

        let lane0 = collected.take_partition(0);
        let lane1 = collected.take_partition(1);
        assert_rows_eq_unordered(&[generate_batch!([1, 2], ["x", "y"])], &lane0);
        assert_rows_eq_unordered(&[generate_batch!([1, 2], ["x", "y"])], &lane1);
    }

    #[test]
    fn already_distinct_input_unchanged() {
        let input = descriptor(1).with_distinct_columns(["a"].into_iter().collect());
        let step =
            DistinctStep::try_new(input, SizeLimits::unlimited(), None, ["a"], false, None)
                .unwrap();

        let batches = vec![
            generate_batch!([1, 2], ["x", "x"]),
            generate_batch!([3], ["y"]),
        ];
        let source = PhysicalBatchSource::new([DataType::Int32, DataType::Utf8], batches.clone());
        let sink = PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(props(), source, 1).unwrap();
        step.transform_pipeline(&mut builder).unwrap();
        execute_query(&InlineRuntime::new(1), builder.finish(sink).unwrap()).unwrap();

        let out = collected.take_all();
        assert_eq!(batches.len(), out.len());
        for (expected, got) in batches.iter().zip(&out) {
            assert_batches_eq(expected, got);
        }
    }

    #[test]
    fn sorted_prefix_end_to_end() {
        let step = DistinctStep::try_new(
            descriptor(1),
            SizeLimits::unlimited(),
            None,
            ["a"],
            false,
            Some(SortPrefix::new(["a", "b"])),
        )
        .unwrap();

        let source = PhysicalBatchSource::new(
            [DataType::Int32, DataType::Utf8],
            [
                generate_batch!([1, 1], ["a", "a"]),
                generate_batch!([1, 2], ["b", "b"]),
            ],
        );
        let sink = PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(props(), source, 1).unwrap();
        step.transform_pipeline(&mut builder).unwrap();
        execute_query(&InlineRuntime::new(1), builder.finish(sink).unwrap()).unwrap();

        assert_rows_eq_unordered(
            &[generate_batch!([1, 2], ["a", "b"])],
            &collected.take_all(),
        );
    }

    #[test]
    fn final_sort_prefix_over_lanes() {
        // Each lane is sorted on `a`, merging the lanes is not.
        let lanes = vec![
            vec![generate_batch!([1, 2], ["x", "x"])],
            vec![generate_batch!([1, 2], ["y", "y"])],
        ];

        let step = DistinctStep::try_new(
            descriptor(2),
            SizeLimits::unlimited(),
            None,
            ["a"],
            false,
            Some(SortPrefix::new(["a"])),
        )
        .unwrap();
        assert_eq!("[a]", step.output().distinct_columns().to_string());

        let source = PhysicalBatchSource::new_partitioned([DataType::Int32, DataType::Utf8], lanes);
        let sink = PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(props(), source, 2).unwrap();
        step.transform_pipeline(&mut builder).unwrap();
        execute_query(&InlineRuntime::new(2), builder.finish(sink).unwrap()).unwrap();

        let rows = collect_rows(&collected.take_all());
        let mut keys: Vec<_> = rows.iter().map(|row| row[0].clone()).collect();
        keys.sort_by_key(|v| v.to_string());
        assert_eq!(vec![ScalarValue::from(1_i32), ScalarValue::from(2_i32)], keys);
    }

    /// Batches for each lane, sorted on the first column within a lane.
    fn random_sorted_lanes(rng: &mut ChaCha8Rng, lanes: usize) -> Vec<Vec<Batch>> {
        (0..lanes)
            .map(|_| {
                let num_rows = rng.random_range(1..200);
                let mut a: Vec<i32> = (0..num_rows).map(|_| rng.random_range(0..30)).collect();
                a.sort_unstable();
                let b: Vec<&str> = (0..num_rows)
                    .map(|_| ["x", "y", "z"][rng.random_range(0..3)])
                    .collect();

                let mut batches = Vec::new();
                let mut start = 0;
                while start < num_rows {
                    let len = rng.random_range(1..40).min(num_rows - start);
                    batches.push(
                        Batch::try_from_arrays([
                            Array::from_iter(a[start..start + len].to_vec()),
                            Array::from_iter(b[start..start + len].to_vec()),
                        ])
                        .unwrap(),
                    );
                    start += len;
                }
                batches
            })
            .collect()
    }

    /// Run a pre-distinct and, if `with_final`, a final distinct over `lanes`.
    ///
    /// Returns the collected output of each output lane.
    fn run_distinct_plan(
        lanes: Vec<Vec<Batch>>,
        sort_prefix: Option<SortPrefix>,
        with_final: bool,
    ) -> Vec<Vec<Batch>> {
        let partitions = lanes.len();
        let pre = DistinctStep::try_new(
            descriptor(partitions),
            SizeLimits::unlimited(),
            None,
            ["a", "b"],
            true,
            sort_prefix.clone(),
        )
        .unwrap();
        assert_eq!(
            sort_prefix.is_some(),
            matches!(
                pre.plan(),
                DistinctPlan::Operator(DistinctStrategy::SortedPrefix { .. })
            )
        );

        let source = PhysicalBatchSource::new_partitioned([DataType::Int32, DataType::Utf8], lanes);
        let sink = PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(props(), source, partitions).unwrap();
        pre.transform_pipeline(&mut builder).unwrap();
        if with_final {
            let fin = DistinctStep::try_new(
                pre.output().clone(),
                SizeLimits::unlimited(),
                None,
                ["a", "b"],
                false,
                sort_prefix,
            )
            .unwrap();
            fin.transform_pipeline(&mut builder).unwrap();
        }
        let out_partitions = builder.partitions();
        execute_query(&InlineRuntime::new(partitions), builder.finish(sink).unwrap()).unwrap();

        (0..out_partitions)
            .map(|partition| collected.take_partition(partition))
            .collect()
    }

    #[test]
    fn sorted_and_hash_plans_agree_across_lanes() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        for _ in 0..5 {
            let lanes = random_sorted_lanes(&mut rng, 3);
            let all: Vec<Batch> = lanes.iter().flatten().cloned().collect();

            // Pre-distinct only, lane by lane in the same order.
            let sorted = run_distinct_plan(lanes.clone(), Some(SortPrefix::new(["a"])), false);
            let hashed = run_distinct_plan(lanes.clone(), None, false);
            assert_eq!(3, sorted.len());
            for (sorted, hashed) in sorted.iter().zip(&hashed) {
                assert_eq!(collect_rows(hashed), collect_rows(sorted));
            }

            // Pre-distinct followed by a final distinct.
            let sorted = run_distinct_plan(lanes.clone(), Some(SortPrefix::new(["a"])), true);
            let hashed = run_distinct_plan(lanes, None, true);
            assert_eq!(1, sorted.len());

            let expected = distinct_rows(&all);
            assert_eq!(expected, distinct_rows(&sorted[0]));
            assert_eq!(expected.len(), collect_rows(&sorted[0]).len());
            assert_eq!(distinct_rows(&hashed[0]), distinct_rows(&sorted[0]));
        }
    }

    #[test]
    fn session_batch_size_splits_source_batches() {
        let runtime = InlineRuntime::new(1);
        let mut session = SessionConfig::new(&runtime);
        session
            .set_from_scalar("batch_size", ScalarValue::from(4_i64))
            .unwrap();
        let plan_conf = ExecutablePlanConfig::from_session(&session);

        let step = DistinctStep::try_new(
            descriptor(1),
            SizeLimits::unlimited(),
            None,
            ["a"],
            false,
            None,
        )
        .unwrap();

        let source = PhysicalBatchSource::new(
            [DataType::Int32, DataType::Utf8],
            [generate_batch!(
                [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
                ["v", "v", "v", "v", "v", "v", "v", "v", "v", "v"]
            )],
        );
        let sink = PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]);
        let collected = sink.collected();

        let mut builder =
            PipelineBuilder::try_new(plan_conf.execution_properties(), source, 1).unwrap();
        step.transform_pipeline(&mut builder).unwrap();
        let profiles = execute_query(&runtime, builder.finish(sink).unwrap()).unwrap();

        assert_eq!(3, profiles[0].batches_pulled);
        assert_eq!(10, profiles[0].rows_pulled);

        let sizes: Vec<_> = collected.take_all().iter().map(|b| b.num_rows()).collect();
        assert_eq!(vec![4, 4, 2], sizes);
    }

    /// Source yielding after every batch, letting other pipelines run in
    /// between pulls.
    #[derive(Debug)]
    struct YieldingSource {
        lanes: Mutex<Vec<Vec<Batch>>>,
    }

    #[derive(Debug)]
    struct YieldingState {
        batches: VecDeque<Batch>,
        yielded: bool,
    }

    impl BaseOperator for YieldingSource {
        const OPERATOR_NAME: &str = "YieldingSource";
        type OperatorState = ();

        fn create_operator_state(&self, _props: ExecutionProperties) -> Result<()> {
            Ok(())
        }

        fn output_types(&self) -> &[DataType] {
            &[DataType::Int32]
        }
    }

    impl PullOperator for YieldingSource {
        type PartitionPullState = YieldingState;

        fn create_partition_pull_states(
            &self,
            _operator_state: &(),
            _props: ExecutionProperties,
            partitions: usize,
        ) -> Result<Vec<YieldingState>> {
            let lanes = std::mem::take(&mut *self.lanes.lock());
            assert_eq!(partitions, lanes.len());
            Ok(lanes
                .into_iter()
                .map(|batches| YieldingState {
                    batches: batches.into(),
                    yielded: false,
                })
                .collect())
        }

        fn poll_pull(
            &self,
            cx: &mut Context,
            _operator_state: &(),
            state: &mut YieldingState,
            output: &mut Batch,
        ) -> Result<PollPull> {
            if !state.yielded {
                state.yielded = true;
                cx.waker().wake_by_ref();
                return Ok(PollPull::Pending);
            }
            state.yielded = false;

            match state.batches.pop_front() {
                Some(batch) => {
                    *output = batch;
                    Ok(PollPull::HasMore)
                }
                None => Ok(PollPull::Exhausted),
            }
        }
    }

    impl Explainable for YieldingSource {
        fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
            ExplainEntry::new(Self::OPERATOR_NAME)
        }
    }

    #[test]
    fn limit_hint_stops_upstream_lanes() {
        // Every batch holds two values not seen anywhere else.
        let lanes: Vec<Vec<Batch>> = (0..2)
            .map(|lane| {
                (0..20)
                    .map(|idx| {
                        let base = (lane * 1000 + idx * 10) as i32;
                        generate_batch!([base, base + 1])
                    })
                    .collect()
            })
            .collect();

        let input = StreamDescriptor::try_new([("a", DataType::Int32)], 2).unwrap();
        let step = DistinctStep::try_new(input, SizeLimits::unlimited(), Some(3), ["a"], false, None)
            .unwrap();

        let source = YieldingSource {
            lanes: Mutex::new(lanes),
        };
        let sink = PhysicalBatchSink::new([DataType::Int32]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(props(), source, 2).unwrap();
        step.transform_pipeline(&mut builder).unwrap();
        let query = builder.finish(sink).unwrap();
        let downstream_token = query.pipelines[1].partition_pipelines()[0].token().clone();

        let profiles = execute_query(&InlineRuntime::new(2), query).unwrap();

        assert_eq!(3, collect_rows(&collected.take_all()).len());
        assert_eq!(Some(CancelReason::InputNotNeeded), downstream_token.reason());

        let upstream: Vec<_> = profiles
            .iter()
            .filter(|p| p.info.pipeline.0 == 0)
            .collect();
        assert_eq!(2, upstream.len());
        for profile in upstream {
            assert!(
                profile.batches_pulled < 20,
                "upstream lane pulled everything: {profile:?}"
            );
        }
    }

    #[test]
    fn strict_overflow_fails_query() {
        let runtime = InlineRuntime::new(2);
        let mut session = SessionConfig::new(&runtime);
        session
            .set_from_scalar("max_rows_in_distinct", ScalarValue::from(2_i64))
            .unwrap();
        let plan_conf = ExecutablePlanConfig::from_session(&session);
        assert_eq!(2, plan_conf.partitions);

        let step = DistinctStep::try_new(
            descriptor(plan_conf.partitions),
            session.distinct_size_limits(),
            None,
            ["a"],
            false,
            None,
        )
        .unwrap();

        let source = PhysicalBatchSource::new_partitioned(
            [DataType::Int32, DataType::Utf8],
            vec![
                vec![generate_batch!([1, 2], ["x", "x"])],
                vec![generate_batch!([3, 4], ["x", "x"])],
            ],
        );
        let mut builder = PipelineBuilder::try_new(
            plan_conf.execution_properties(),
            source,
            plan_conf.partitions,
        )
        .unwrap();
        step.transform_pipeline(&mut builder).unwrap();
        let query = builder
            .finish(PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]))
            .unwrap();
        let token = query.token.clone();

        let err = execute_query(&runtime, query).unwrap_err();
        assert_eq!(ErrorKind::SetLimitExceeded, err.kind());
        assert_eq!(Some("2"), err.get_field("max_rows"));
        assert_eq!(Some("3"), err.get_field("rows"));
        assert_eq!(Some(CancelReason::QueryCanceled), token.reason());
    }

    #[test]
    fn passthrough_overflow_completes() {
        let runtime = InlineRuntime::new(1);
        let mut session = SessionConfig::new(&runtime);
        session
            .set_from_scalar("max_rows_in_distinct", ScalarValue::from(1_i64))
            .unwrap();
        session
            .set_from_scalar("distinct_overflow_mode", ScalarValue::from("passthrough"))
            .unwrap();

        let step = DistinctStep::try_new(
            descriptor(1),
            session.distinct_size_limits(),
            None,
            ["a"],
            false,
            None,
        )
        .unwrap();

        let source = PhysicalBatchSource::new(
            [DataType::Int32, DataType::Utf8],
            [generate_batch!([1, 1, 2, 2], ["x", "x", "y", "y"])],
        );
        let sink = PhysicalBatchSink::new([DataType::Int32, DataType::Utf8]);
        let collected = sink.collected();

        let mut builder = PipelineBuilder::try_new(props(), source, 1).unwrap();
        step.transform_pipeline(&mut builder).unwrap();
        execute_query(&runtime, builder.finish(sink).unwrap()).unwrap();

        // First row deduped normally, second distinct value overflows and
        // everything after passes through.
        assert_rows_eq_unordered(
            &[generate_batch!([1, 2, 2], ["x", "y", "y"])],
            &collected.take_all(),
        );
    }
}
