use super::session::SessionConfig;
use crate::execution::operators::ExecutionProperties;

/// Configuration for building executable pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutablePlanConfig {
    /// Target number of partitions in executable pipelines.
    ///
    /// Partitionining determines parallelism for a single pipeline.
    pub partitions: usize,
    /// Target batch size.
    pub batch_size: usize,
}

impl ExecutablePlanConfig {
    pub fn from_session(conf: &SessionConfig) -> Self {
        ExecutablePlanConfig {
            partitions: conf.partitions as usize,
            batch_size: conf.batch_size as usize,
        }
    }

    pub const fn execution_properties(&self) -> ExecutionProperties {
        ExecutionProperties {
            batch_size: self.batch_size,
        }
    }
}
