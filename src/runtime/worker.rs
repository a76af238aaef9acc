use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

use crate::model::now_ms;
use crate::runtime::engine::Engine;
use crate::runtime::queue::{Job, JobKind, TaskQueue};

/// Drains a job queue into the engine, bounding every job by a timeout.
pub struct Worker {
    engine: Arc<Engine>,
    queue: Arc<dyn TaskQueue>,
    job_timeout: Duration,
}

impl Worker {
    pub fn new(engine: Arc<Engine>, queue: Arc<dyn TaskQueue>, job_timeout: Duration) -> Self {
        Self {
            engine,
            queue,
            job_timeout,
        }
    }

    pub async fn run(&self) {
        info!("Worker started.");
        loop {
            match self.queue.pop().await {
                Ok(Some(job)) => {
                    self.process(job).await;
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(error = ?e, "Failed to pop job");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    /// Pops and runs at most one job. Returns false if the queue had nothing.
    pub async fn run_once(&self) -> Result<bool> {
        match self.queue.pop().await? {
            Some(job) => {
                self.process(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, job: Job) {
        match timeout(self.job_timeout, self.dispatch(&job)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(job_id = %job.id, job = ?job.kind, error = ?e, "Job failed");
            }
            Err(_) => {
                error!(job_id = %job.id, job = ?job.kind, "Job timed out after {:?}", self.job_timeout);
            }
        }
    }

    async fn dispatch(&self, job: &Job) -> Result<()> {
        match &job.kind {
            JobKind::CorrelateMessages => {
                let delivered = self.engine.correlate_messages().await?;
                info!(job_id = %job.id, delivered = delivered.len(), "Messages correlated");
            }
            JobKind::FireDueTimers { now } => {
                let fired = self
                    .engine
                    .fire_due_timers(now.unwrap_or_else(now_ms))
                    .await?;
                info!(job_id = %job.id, fired = fired.len(), "Due timers fired");
            }
            JobKind::ArchiveProcessInstance {
                process_instance_id,
            } => {
                self.engine
                    .complete_process_instance(*process_instance_id)
                    .await?;
            }
            JobKind::CleanupProcessInstance {
                process_instance_id,
            } => {
                self.engine
                    .delete_live_process_instance(*process_instance_id)
                    .await?;
            }
        }
        Ok(())
    }
}
