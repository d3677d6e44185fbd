//! Minimal batch runtime: chunk-oriented and tasklet steps, jobs as ordered
//! step lists, and a launcher that records every run in the history tables.

pub mod launcher;
pub mod step;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use launcher::{Job, JobLauncher, JobReport, StepOutcome};
pub use step::{
    ChunkOrientedStep, ChunkStep, Keyed, Step, StepFailure, StepReport, Tasklet, TaskletStep,
};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("job {job} is already running (run {run_key})")]
    AlreadyRunning { job: String, run_key: String },
    #[error("step {step} failed: {source:#}")]
    Step {
        step: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("run history unavailable: {0:#}")]
    History(#[source] anyhow::Error),
}

/// Per-run values shared by every step of a job execution.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run_id: i64,
    pub run_key: String,
    pub job_name: String,
    /// Job clock, fixed when the run starts.
    pub now: DateTime<Utc>,
}
