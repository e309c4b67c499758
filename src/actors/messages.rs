//! Message types for job actor communication

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

/// Commands that can be sent to a job actor
#[derive(Debug)]
pub enum JobCommand {
    /// Run the job immediately (bypassing the interval timer)
    ///
    /// Used by on-demand API calls and tests.
    RunNow {
        /// Channel to send the run report back
        respond_to: oneshot::Sender<JobReport>,
    },

    /// Gracefully shut down the job
    ///
    /// The actor finishes any in-flight run and then exits.
    Shutdown,
}

/// Outcome of one job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: &'static str,

    /// Targets processed (nodes, services, or retention passes)
    pub targets: usize,

    /// Targets whose unit of work failed
    pub failures: usize,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn new(job: &'static str, started_at: DateTime<Utc>) -> Self {
        Self {
            job,
            targets: 0,
            failures: 0,
            started_at,
            finished_at: started_at,
        }
    }

    /// Count one processed target
    pub fn record<T, E>(&mut self, result: &Result<T, E>) {
        self.targets += 1;
        if result.is_err() {
            self.failures += 1;
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}
