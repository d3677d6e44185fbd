//! Moves passes whose end time has passed from IN_PROGRESS to EXPIRED.

use crate::batch::{ChunkOrientedStep, ChunkStep, Job, JobContext, Keyed};
use crate::config::ExpirePasses as ExpirePassesConfig;
use crate::db;
use crate::model::{Pass, PassStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

pub const JOB_NAME: &str = "expire_passes";
pub const STEP_NAME: &str = "expire_passes_step";

impl Keyed for Pass {
    fn seq(&self) -> i64 {
        self.pass_seq
    }
}

pub fn expire(mut pass: Pass, now: DateTime<Utc>) -> Pass {
    pass.status = PassStatus::Expired;
    pass.expired_at = Some(now);
    pass
}

pub struct ExpirePassesStep;

#[async_trait]
impl ChunkStep for ExpirePassesStep {
    type Item = Pass;
    type Output = Pass;

    async fn read(
        &self,
        conn: &mut SqliteConnection,
        ctx: &JobContext,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<Pass>> {
        db::find_passes_ended_by(conn, PassStatus::InProgress, ctx.now, after_seq, limit).await
    }

    async fn process(&self, ctx: &JobContext, item: Pass) -> Result<Option<Pass>> {
        Ok(Some(expire(item, ctx.now)))
    }

    async fn write(
        &self,
        conn: &mut SqliteConnection,
        ctx: &JobContext,
        items: Vec<Pass>,
    ) -> Result<u64> {
        db::update_pass_states(conn, &items, ctx.now).await
    }
}

pub fn job(cfg: &ExpirePassesConfig) -> Job {
    Job::new(JOB_NAME).step(ChunkOrientedStep::new(
        STEP_NAME,
        cfg.chunk_size,
        ExpirePassesStep,
    ))
}
