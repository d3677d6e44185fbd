//! Issues one pass per group member for every READY bulk pass request.

use crate::batch::{Job, JobContext, StepReport, Tasklet, TaskletStep};
use crate::config::AddPasses as AddPassesConfig;
use crate::db;
use crate::model::{BulkPass, BulkPassStatus, NewPass, Package, PassStatus};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Duration;
use sqlx::SqliteConnection;
use tracing::{info, warn};

pub const JOB_NAME: &str = "add_passes";
pub const STEP_NAME: &str = "add_passes_step";

const MAX_LOOKBACK_HOURS: u64 = 24 * 365 * 100;

/// Build the pass a bulk request grants to one user.
///
/// The request's count and window win; the package fills in whatever the
/// request leaves open.
pub fn issue_pass(request: &BulkPass, package: &Package, user_id: &str) -> NewPass {
    let ended_at = request.ended_at.or_else(|| {
        package
            .period
            .map(|days| request.started_at + Duration::days(i64::from(days)))
    });
    NewPass {
        package_seq: request.package_seq,
        user_id: user_id.to_string(),
        status: PassStatus::Ready,
        remaining_count: request.count.or(package.count),
        started_at: request.started_at,
        ended_at,
    }
}

pub struct AddPassesTasklet {
    lookback: Duration,
}

impl AddPassesTasklet {
    pub fn new(lookback: Duration) -> Self {
        Self { lookback }
    }
}

#[async_trait]
impl Tasklet for AddPassesTasklet {
    async fn execute(&self, conn: &mut SqliteConnection, ctx: &JobContext) -> Result<StepReport> {
        let threshold = ctx.now - self.lookback;
        let requests =
            db::find_bulk_passes_started_after(conn, BulkPassStatus::Ready, threshold).await?;

        let mut passes = Vec::new();
        for request in &requests {
            let package = db::find_package(conn, request.package_seq)
                .await?
                .ok_or_else(|| {
                    anyhow!(
                        "bulk pass {} references missing package {}",
                        request.bulk_pass_seq,
                        request.package_seq
                    )
                })?;
            let members = db::find_group_members(conn, &request.user_group_id).await?;
            if members.is_empty() {
                warn!(
                    bulk_pass = request.bulk_pass_seq,
                    group = %request.user_group_id,
                    "user group has no members"
                );
            }
            passes.extend(
                members
                    .iter()
                    .map(|m| issue_pass(request, &package, &m.user_id)),
            );
        }

        let written = if passes.is_empty() {
            0
        } else {
            db::insert_passes(conn, &passes, ctx.now).await?
        };

        for request in &requests {
            db::update_bulk_pass_status(
                conn,
                request.bulk_pass_seq,
                BulkPassStatus::Processed,
                ctx.now,
            )
            .await?;
        }

        info!(requests = requests.len(), passes = written, "bulk passes issued");
        Ok(StepReport {
            read_count: requests.len() as u64,
            write_count: written,
            ..StepReport::default()
        })
    }
}

pub fn job(cfg: &AddPassesConfig) -> Job {
    let lookback = Duration::hours(cfg.lookback_hours.min(MAX_LOOKBACK_HOURS) as i64);
    Job::new(JOB_NAME).step(TaskletStep::new(STEP_NAME, AddPassesTasklet::new(lookback)))
}
