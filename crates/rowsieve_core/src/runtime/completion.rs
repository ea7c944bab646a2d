use parking_lot::{Condvar, Mutex};
use rowsieve_error::{DbError, Result};
use tracing::{debug, trace};

use super::pipeline::ErrorSink;
use crate::execution::cancel::{CancelReason, CancellationToken};
use crate::execution::pipeline::partition_pipeline::PartitionPipelineProfile;

/// Tracks completion of all partition pipelines for a query.
///
/// The first error reported cancels the query, errors after that are
/// ignored.
#[derive(Debug)]
pub struct QueryCompletion {
    token: CancellationToken,
    state: Mutex<CompletionState>,
    cond: Condvar,
}

#[derive(Debug)]
struct CompletionState {
    /// Partition pipelines that haven't completed yet.
    remaining: usize,
    failed: bool,
    error: Option<DbError>,
    profiles: Vec<PartitionPipelineProfile>,
}

impl QueryCompletion {
    pub fn new(token: CancellationToken, num_partition_pipelines: usize) -> Self {
        QueryCompletion {
            token,
            state: Mutex::new(CompletionState {
                remaining: num_partition_pipelines,
                failed: false,
                error: None,
                profiles: Vec::with_capacity(num_partition_pipelines),
            }),
            cond: Condvar::new(),
        }
    }

    /// Block until all partition pipelines complete or an error is reported.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.failed {
                return Err(state
                    .error
                    .take()
                    .unwrap_or_else(|| DbError::new("Query failed, error already returned")));
            }
            if state.remaining == 0 {
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    /// Take the profiles of completed partition pipelines, ordered by
    /// pipeline then partition.
    pub fn take_profiles(&self) -> Vec<PartitionPipelineProfile> {
        let mut profiles = std::mem::take(&mut self.state.lock().profiles);
        profiles.sort_by_key(|p| (p.info.pipeline, p.info.partition));
        profiles
    }
}

impl ErrorSink for QueryCompletion {
    fn set_error(&self, error: DbError) {
        let mut state = self.state.lock();
        if state.failed {
            trace!(%error, "ignoring error after query failed");
            return;
        }

        debug!(%error, "query failed, canceling");
        state.failed = true;
        state.error = Some(error);
        self.token.cancel(CancelReason::QueryCanceled);
        self.cond.notify_all();
    }

    fn partition_pipeline_complete(&self, profile: PartitionPipelineProfile) {
        let mut state = self.state.lock();
        state.profiles.push(profile);
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            self.cond.notify_all();
        }
    }
}
