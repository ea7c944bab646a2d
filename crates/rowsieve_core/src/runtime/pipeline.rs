use std::fmt::Debug;
use std::sync::Arc;

use rowsieve_error::DbError;

use crate::execution::pipeline::partition_pipeline::{
    ExecutablePartitionPipeline,
    PartitionPipelineProfile,
};

/// How pipelines get executed on a single node.
///
/// This trait only concerns itself with the low-level execution of partition
/// pipelines. Every partition pipeline for a query is handed over at once.
pub trait PipelineRuntime: Debug + Sync + Send + Clone {
    /// Number of partitions to default to when executing.
    fn default_partitions(&self) -> usize;

    /// Spawn execution of multiple pipelines for a query.
    ///
    /// A query handle will be returned allowing for canceling a query.
    ///
    /// When execution encounters an error, the error will be written to the
    /// provided error sink. Successfully completed partition pipelines report
    /// their profiles to the same sink.
    fn spawn_pipelines(
        &self,
        pipelines: Vec<ExecutablePartitionPipeline>,
        errors: Arc<dyn ErrorSink>,
    ) -> Arc<dyn QueryHandle>;
}

/// A handle to a running or recently completed query.
pub trait QueryHandle: Debug + Sync + Send {
    /// Cancel the query.
    ///
    /// This is best effort, and makes no guarantee when the query will be
    /// canceled.
    fn cancel(&self);
}

/// Where to put errors that happen during execution.
///
/// This will get passed to each pipeline task, and if a task encounters an
/// error, it'll push the error here.
pub trait ErrorSink: Debug + Sync + Send {
    /// Push an error.
    fn set_error(&self, error: DbError);

    /// Signal that a partition pipeline ran to completion.
    fn partition_pipeline_complete(&self, profile: PartitionPipelineProfile);
}
