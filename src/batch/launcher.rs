use super::step::{Step, StepReport};
use super::{BatchError, JobContext};
use crate::db::{self, Pool, StepRunRecord};
use crate::model::RunStatus;
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, instrument};
use uuid::Uuid;

/// A named, ordered list of steps.
pub struct Job {
    name: String,
    steps: Vec<Box<dyn Step>>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub status: RunStatus,
    pub report: StepReport,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub run_id: i64,
    pub run_key: String,
    pub job_name: String,
    pub status: RunStatus,
    pub steps: Vec<StepOutcome>,
    pub exit_message: Option<String>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Turn a failed run into the step error that ended it.
    pub fn into_result(self) -> Result<JobReport, BatchError> {
        if self.is_success() {
            return Ok(self);
        }
        let step = self
            .steps
            .iter()
            .find(|s| s.status == RunStatus::Failed)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let message = self.exit_message.unwrap_or_default();
        Err(BatchError::Step {
            step,
            source: anyhow!(message),
        })
    }
}

/// Runs jobs and records them in `job_runs` / `step_runs`.
#[derive(Debug, Clone)]
pub struct JobLauncher {
    pool: Pool,
    stale_after: Duration,
}

impl JobLauncher {
    /// `stale_after`: a STARTED run older than this no longer blocks a new run.
    pub fn new(pool: Pool, stale_after: Duration) -> Self {
        Self { pool, stale_after }
    }

    #[instrument(skip_all, fields(job = %job.name()))]
    pub async fn run(&self, job: &Job, now: DateTime<Utc>) -> Result<JobReport, BatchError> {
        if let Some(running) = db::find_running_job(&self.pool, job.name(), now - self.stale_after)
            .await
            .map_err(BatchError::History)?
        {
            return Err(BatchError::AlreadyRunning {
                job: job.name().to_string(),
                run_key: running.run_key,
            });
        }

        let run_key = Uuid::new_v4().to_string();
        let run_id = db::start_job_run(&self.pool, &run_key, job.name(), now)
            .await
            .map_err(BatchError::History)?;
        let ctx = JobContext {
            run_id,
            run_key: run_key.clone(),
            job_name: job.name().to_string(),
            now,
        };
        info!(run_id, run_key = %run_key, "job started");

        let mut outcomes = Vec::with_capacity(job.steps.len());
        let mut exit_message = None;
        for step in &job.steps {
            let started_at = Utc::now();
            let result = step.run(&self.pool, &ctx).await;
            let ended_at = Utc::now();

            let (status, report, message) = match result {
                Ok(report) => (RunStatus::Completed, report, None),
                Err(failure) => {
                    let message = format!("{:#}", failure.source);
                    error!(
                        step = step.name(),
                        error = %message,
                        committed_chunks = failure.report.commit_count,
                        "step failed"
                    );
                    (RunStatus::Failed, failure.report, Some(message))
                }
            };

            db::insert_step_run(
                &self.pool,
                &StepRunRecord {
                    run_id,
                    step_name: step.name(),
                    status,
                    read_count: report.read_count,
                    filter_count: report.filter_count,
                    skip_count: report.skip_count,
                    write_count: report.write_count,
                    commit_count: report.commit_count,
                    started_at,
                    ended_at,
                    exit_message: message.as_deref(),
                },
            )
            .await
            .map_err(BatchError::History)?;

            outcomes.push(StepOutcome {
                name: step.name().to_string(),
                status,
                report,
            });

            if status == RunStatus::Failed {
                exit_message = message;
                break;
            }
        }

        let status = if exit_message.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        db::finish_job_run(
            &self.pool,
            run_id,
            status,
            Utc::now(),
            exit_message.as_deref(),
        )
        .await
        .map_err(BatchError::History)?;

        match status {
            RunStatus::Completed => info!(run_id, run_key = %run_key, "job completed"),
            _ => error!(run_id, run_key = %run_key, "job failed"),
        }

        Ok(JobReport {
            run_id,
            run_key,
            job_name: job.name().to_string(),
            status,
            steps: outcomes,
            exit_message,
        })
    }
}
