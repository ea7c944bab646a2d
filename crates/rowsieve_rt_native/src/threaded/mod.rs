mod task;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rowsieve_core::execution::cancel::{CancelReason, CancellationToken};
use rowsieve_core::execution::pipeline::partition_pipeline::ExecutablePartitionPipeline;
use rowsieve_core::runtime::pipeline::{ErrorSink, QueryHandle};
use rowsieve_error::{DbError, Result};
use task::{PartitionPipelineTask, TaskState};
use tracing::debug;

use crate::runtime::Scheduler;

/// Work-stealing scheduler executing partition pipelines on a rayon thread
/// pool.
#[derive(Clone)]
pub struct ThreadedScheduler {
    pool: Arc<ThreadPool>,
}

impl fmt::Debug for ThreadedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedScheduler")
            .field("num_threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl Scheduler for ThreadedScheduler {
    type Handle = ThreadedQueryHandle;

    fn try_new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .thread_name(|idx| format!("rowsieve_compute_{idx}"))
            .num_threads(num_threads)
            .build()
            .map_err(|e| DbError::with_source("Failed to build thread pool", Box::new(e)))?;

        Ok(ThreadedScheduler {
            pool: Arc::new(pool),
        })
    }

    fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn spawn_pipelines(
        &self,
        pipelines: Vec<ExecutablePartitionPipeline>,
        errors: Arc<dyn ErrorSink>,
    ) -> ThreadedQueryHandle {
        debug!(num_pipelines = pipelines.len(), "spawning query pipelines");

        let mut tokens = Vec::with_capacity(pipelines.len());
        let mut states = Vec::with_capacity(pipelines.len());

        for pipeline in pipelines {
            tokens.push(pipeline.token().clone());

            let state = Arc::new(TaskState {
                pipeline: Mutex::new(Some(pipeline)),
                errors: errors.clone(),
                pool: self.pool.clone(),
            });

            let task = PartitionPipelineTask::from_task_state(state.clone());
            self.pool.spawn(|| task.execute());

            states.push(state);
        }

        ThreadedQueryHandle { tokens, states }
    }
}

/// Query handle for queries being executed on the threaded runtime.
#[derive(Debug)]
pub struct ThreadedQueryHandle {
    /// Tokens for every partition pipeline in the query.
    tokens: Vec<CancellationToken>,
    states: Vec<Arc<TaskState>>,
}

impl QueryHandle for ThreadedQueryHandle {
    /// Cancel the query.
    ///
    /// Every still running pipeline is rescheduled so it observes the
    /// cancellation even if it's waiting on a waker that'll never fire.
    fn cancel(&self) {
        for token in &self.tokens {
            token.cancel(CancelReason::QueryCanceled);
        }

        for state in &self.states {
            let task = PartitionPipelineTask::from_task_state(state.clone());
            state.pool.spawn(|| task.execute());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rowsieve_core::arrays::array::Array;
    use rowsieve_core::arrays::batch::Batch;
    use rowsieve_core::arrays::datatype::DataType;
    use rowsieve_core::arrays::testutil::collect_rows;
    use rowsieve_core::execution::operators::ExecutionProperties;
    use rowsieve_core::execution::operators::batch_sink::PhysicalBatchSink;
    use rowsieve_core::execution::operators::batch_source::PhysicalBatchSource;
    use rowsieve_core::execution::operators::distinct::size_limits::SizeLimits;
    use rowsieve_core::execution::pipeline::PipelineBuilder;
    use rowsieve_core::execution::planner::SortPrefix;
    use rowsieve_core::execution::planner::plan_distinct::DistinctStep;
    use rowsieve_core::execution::stream::StreamDescriptor;
    use rowsieve_core::runtime::execute_query;
    use rowsieve_core::runtime::pipeline::PipelineRuntime;
    use rowsieve_error::ErrorKind;

    use crate::runtime::ThreadedNativeExecutor;

    fn lanes(partitions: usize, batches_per_lane: usize) -> Vec<Vec<Batch>> {
        (0..partitions)
            .map(|lane| {
                (0..batches_per_lane)
                    .map(|idx| {
                        // Values repeat across lanes and batches.
                        let vals: Vec<i64> =
                            (0..100).map(|v| ((v + idx * 7 + lane * 3) % 50) as i64).collect();
                        Batch::try_from_arrays([Array::from_iter(vals)]).unwrap()
                    })
                    .collect()
            })
            .collect()
    }

    fn distinct_plan(
        partitions: usize,
        limits: SizeLimits,
        limit_hint: Option<usize>,
    ) -> (DistinctStep, DistinctStep) {
        let input = StreamDescriptor::try_new([("v", DataType::Int64)], partitions).unwrap();
        let pre = DistinctStep::try_new(input, limits, None, ["v"], true, None).unwrap();
        let fin = DistinctStep::try_new(pre.output().clone(), limits, limit_hint, ["v"], false, None)
            .unwrap();
        (pre, fin)
    }

    #[test]
    fn distinct_across_threads() {
        logutil::init_test();

        let executor = ThreadedNativeExecutor::try_new_with_num_threads(4).unwrap();
        let partitions = executor.default_partitions();
        assert_eq!(4, partitions);

        let (pre, fin) = distinct_plan(partitions, SizeLimits::unlimited(), None);

        let source = PhysicalBatchSource::new_partitioned([DataType::Int64], lanes(partitions, 8));
        let sink = PhysicalBatchSink::new([DataType::Int64]);
        let collected = sink.collected();

        let props = ExecutionProperties { batch_size: 128 };
        let mut builder = PipelineBuilder::try_new(props, source, partitions).unwrap();
        pre.transform_pipeline(&mut builder).unwrap();
        fin.transform_pipeline(&mut builder).unwrap();

        execute_query(&executor, builder.finish(sink).unwrap()).unwrap();

        let rows = collect_rows(&collected.take_all());
        let unique: BTreeSet<_> = rows.iter().map(|r| r[0].to_string()).collect();
        assert_eq!(50, rows.len());
        assert_eq!(50, unique.len());
    }

    #[test]
    fn limit_hint_across_threads() {
        logutil::init_test();

        let executor = ThreadedNativeExecutor::try_new_with_num_threads(2).unwrap();
        let (pre, fin) = distinct_plan(2, SizeLimits::unlimited(), Some(5));

        let source = PhysicalBatchSource::new_partitioned([DataType::Int64], lanes(2, 16));
        let sink = PhysicalBatchSink::new([DataType::Int64]);
        let collected = sink.collected();

        let props = ExecutionProperties { batch_size: 128 };
        let mut builder = PipelineBuilder::try_new(props, source, 2).unwrap();
        pre.transform_pipeline(&mut builder).unwrap();
        fin.transform_pipeline(&mut builder).unwrap();

        execute_query(&executor, builder.finish(sink).unwrap()).unwrap();

        assert_eq!(5, collect_rows(&collected.take_all()).len());
    }

    #[test]
    fn strict_limit_errors() {
        logutil::init_test();

        let executor = ThreadedNativeExecutor::try_new_with_num_threads(2).unwrap();
        let limits = SizeLimits {
            max_rows: Some(10),
            ..SizeLimits::unlimited()
        };
        let (pre, fin) = distinct_plan(2, limits, None);

        let source = PhysicalBatchSource::new_partitioned([DataType::Int64], lanes(2, 4));
        let props = ExecutionProperties { batch_size: 128 };
        let mut builder = PipelineBuilder::try_new(props, source, 2).unwrap();
        pre.transform_pipeline(&mut builder).unwrap();
        fin.transform_pipeline(&mut builder).unwrap();
        let query = builder.finish(PhysicalBatchSink::new([DataType::Int64])).unwrap();

        let err = execute_query(&executor, query).unwrap_err();
        assert_eq!(ErrorKind::SetLimitExceeded, err.kind());
    }

    /// Lanes sorted on the first column, with a second column that repeats
    /// within each group.
    fn sorted_lanes(partitions: usize) -> Vec<Vec<Batch>> {
        (0..partitions)
            .map(|lane| {
                let keys: Vec<i64> = (0..120).map(|row| (row / 4 + lane * 5) as i64).collect();
                let vals: Vec<i64> = (0..120).map(|row| ((row + lane) % 3) as i64).collect();
                keys.chunks(25)
                    .zip(vals.chunks(25))
                    .map(|(k, v)| {
                        Batch::try_from_arrays([
                            Array::from_iter(k.to_vec()),
                            Array::from_iter(v.to_vec()),
                        ])
                        .unwrap()
                    })
                    .collect()
            })
            .collect()
    }

    fn run_sorted_or_hash(
        executor: &ThreadedNativeExecutor,
        sort_prefix: Option<SortPrefix>,
    ) -> BTreeSet<(String, String)> {
        let input = StreamDescriptor::try_new([("k", DataType::Int64), ("v", DataType::Int64)], 3)
            .unwrap();
        let pre = DistinctStep::try_new(
            input,
            SizeLimits::unlimited(),
            None,
            ["k", "v"],
            true,
            sort_prefix.clone(),
        )
        .unwrap();
        let fin = DistinctStep::try_new(
            pre.output().clone(),
            SizeLimits::unlimited(),
            None,
            ["k", "v"],
            false,
            sort_prefix,
        )
        .unwrap();

        let source =
            PhysicalBatchSource::new_partitioned([DataType::Int64, DataType::Int64], sorted_lanes(3));
        let sink = PhysicalBatchSink::new([DataType::Int64, DataType::Int64]);
        let collected = sink.collected();

        let props = ExecutionProperties { batch_size: 16 };
        let mut builder = PipelineBuilder::try_new(props, source, 3).unwrap();
        pre.transform_pipeline(&mut builder).unwrap();
        fin.transform_pipeline(&mut builder).unwrap();
        execute_query(executor, builder.finish(sink).unwrap()).unwrap();

        let rows = collect_rows(&collected.take_all());
        let set: BTreeSet<_> = rows
            .iter()
            .map(|r| (r[0].to_string(), r[1].to_string()))
            .collect();
        assert_eq!(rows.len(), set.len(), "duplicate rows in output");
        set
    }

    #[test]
    fn sorted_prefix_matches_hash_across_threads() {
        logutil::init_test();

        let executor = ThreadedNativeExecutor::try_new_with_num_threads(3).unwrap();

        let expected: BTreeSet<_> = sorted_lanes(3)
            .iter()
            .flatten()
            .flat_map(|batch| collect_rows([batch]))
            .map(|r| (r[0].to_string(), r[1].to_string()))
            .collect();

        let sorted = run_sorted_or_hash(&executor, Some(SortPrefix::new(["k"])));
        let hashed = run_sorted_or_hash(&executor, None);

        assert_eq!(expected, sorted);
        assert_eq!(expected, hashed);
    }
}
