//! Periodic job actors
//!
//! Each job runs as its own task, owning its state. The actor ticks on a
//! fixed interval and answers commands between runs:
//!
//! ```text
//! Timer tick ──┐
//!              ├──> PeriodicJob::run_once ──> JobReport
//! RunNow ──────┘
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use super::messages::{JobCommand, JobReport};

/// Work done on every tick of a job actor
#[async_trait]
pub trait PeriodicJob: Send + 'static {
    fn name(&self) -> &'static str;

    /// Process every target once; failures are counted, never returned
    async fn run_once(&mut self, report: &mut JobReport);
}

pub struct JobActor<J> {
    job: J,
    command_rx: mpsc::Receiver<JobCommand>,
    interval_duration: Duration,
}

impl<J: PeriodicJob> JobActor<J> {
    pub fn new(job: J, command_rx: mpsc::Receiver<JobCommand>, interval_duration: Duration) -> Self {
        Self {
            job,
            command_rx,
            interval_duration,
        }
    }

    /// Run until a Shutdown command arrives or every handle is dropped
    #[instrument(skip(self), fields(job = self.job.name()))]
    pub async fn run(mut self) {
        debug!("starting job actor with interval {:?}", self.interval_duration);

        // the first run happens one period after start
        let mut ticker = Self::ticker(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_job().await;
                    if report.failures > 0 {
                        warn!("{} of {} targets failed", report.failures, report.targets);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        JobCommand::RunNow { respond_to } => {
                            debug!("received RunNow command");
                            let report = self.run_job().await;
                            let _ = respond_to.send(report);
                        }

                        JobCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("job actor stopped");
    }

    fn ticker(period: Duration) -> tokio::time::Interval {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    async fn run_job(&mut self) -> JobReport {
        let mut report = JobReport::new(self.job.name(), Utc::now());
        self.job.run_once(&mut report).await;
        let report = report.finish();

        info!(
            "{} run finished: {} targets, {} failures",
            report.job, report.targets, report.failures
        );
        report
    }
}

/// Handle for controlling a job actor
pub struct JobHandle {
    sender: mpsc::Sender<JobCommand>,
    name: &'static str,
    /// Taken by the first shutdown
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobHandle {
    /// Spawn a job actor on the current runtime
    pub fn spawn<J: PeriodicJob>(job: J, interval_duration: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let name = job.name();

        let actor = JobActor::new(job, cmd_rx, interval_duration);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            name,
            task: Mutex::new(Some(task)),
        }
    }

    /// Run the job now and wait for its report
    pub async fn run_now(&self) -> Result<JobReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(JobCommand::RunNow { respond_to: tx })
            .await
            .with_context(|| format!("{} job is not running", self.name))?;

        rx.await
            .with_context(|| format!("{} job stopped before reporting", self.name))
    }

    /// Stop the job, waiting for an in-flight run to finish
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let _ = self.sender.send(JobCommand::Shutdown).await;
        if let Err(e) = task.await {
            warn!("{} job ended abnormally: {e}", self.name);
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
