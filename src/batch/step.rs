use super::JobContext;
use crate::db::Pool;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Counters collected while a step runs. Only committed chunks are counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub read_count: u64,
    /// Items `process` dropped on purpose.
    pub filter_count: u64,
    /// Items whose processing failed but did not fail the step.
    pub skip_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
}

impl StepReport {
    fn absorb(&mut self, chunk: &StepReport) {
        self.read_count += chunk.read_count;
        self.filter_count += chunk.filter_count;
        self.skip_count += chunk.skip_count;
        self.write_count += chunk.write_count;
        self.commit_count += chunk.commit_count;
    }
}

/// A failed step, with the work it committed before the failure.
#[derive(Debug, Error)]
#[error("{source:#}")]
pub struct StepFailure {
    pub report: StepReport,
    #[source]
    pub source: anyhow::Error,
}

impl From<anyhow::Error> for StepFailure {
    fn from(source: anyhow::Error) -> Self {
        Self {
            report: StepReport::default(),
            source,
        }
    }
}

/// Items read by a chunk step expose their sequence id; the reader pages on it.
pub trait Keyed {
    fn seq(&self) -> i64;
}

/// Read → process → write contract of a chunk-oriented step.
///
/// `read` returns at most `limit` items with a sequence id greater than
/// `after_seq`, ordered by sequence id. `process` returning `None` filters the
/// item out of the chunk. A `process` error fails the step unless
/// [`ChunkStep::skip_on_process_error`] says otherwise, in which case the item
/// is counted as skipped.
#[async_trait]
pub trait ChunkStep: Send + Sync {
    type Item: Keyed + Send;
    type Output: Send;

    async fn read(
        &self,
        conn: &mut SqliteConnection,
        ctx: &JobContext,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<Self::Item>>;

    async fn process(&self, ctx: &JobContext, item: Self::Item) -> Result<Option<Self::Output>>;

    /// Persist one chunk. Returns the number of rows written.
    async fn write(
        &self,
        conn: &mut SqliteConnection,
        ctx: &JobContext,
        items: Vec<Self::Output>,
    ) -> Result<u64>;

    fn skip_on_process_error(&self) -> bool {
        false
    }
}

/// A single unit of work executed inside one transaction.
#[async_trait]
pub trait Tasklet: Send + Sync {
    async fn execute(&self, conn: &mut SqliteConnection, ctx: &JobContext) -> Result<StepReport>;
}

#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, pool: &Pool, ctx: &JobContext) -> Result<StepReport, StepFailure>;
}

pub struct ChunkOrientedStep<S> {
    name: String,
    chunk_size: usize,
    inner: S,
}

impl<S: ChunkStep> ChunkOrientedStep<S> {
    pub fn new(name: impl Into<String>, chunk_size: usize, inner: S) -> Self {
        Self {
            name: name.into(),
            chunk_size: chunk_size.max(1),
            inner,
        }
    }

    /// Runs one chunk in its own transaction. `Ok(None)` once the reader is exhausted.
    async fn run_chunk(
        &self,
        pool: &Pool,
        ctx: &JobContext,
        cursor: &mut i64,
    ) -> Result<Option<StepReport>> {
        // Dropping the transaction on error rolls the chunk back.
        let mut tx = pool.begin().await?;
        let items = self
            .inner
            .read(&mut *tx, ctx, *cursor, self.chunk_size as i64)
            .await?;
        if items.is_empty() {
            debug!(cursor = *cursor, "reader exhausted");
            return Ok(None);
        }

        let mut chunk = StepReport {
            read_count: items.len() as u64,
            commit_count: 1,
            ..StepReport::default()
        };
        let next_cursor = items.iter().map(Keyed::seq).max().unwrap_or(*cursor);

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match self.inner.process(ctx, item).await {
                Ok(Some(o)) => out.push(o),
                Ok(None) => chunk.filter_count += 1,
                Err(err) if self.inner.skip_on_process_error() => {
                    warn!(error = %format!("{err:#}"), "item skipped");
                    chunk.skip_count += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if !out.is_empty() {
            chunk.write_count = self.inner.write(&mut *tx, ctx, out).await?;
        }
        tx.commit().await?;
        *cursor = next_cursor;
        Ok(Some(chunk))
    }
}

#[async_trait]
impl<S: ChunkStep> Step for ChunkOrientedStep<S> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(step = %self.name, run_key = %ctx.run_key))]
    async fn run(&self, pool: &Pool, ctx: &JobContext) -> Result<StepReport, StepFailure> {
        let mut report = StepReport::default();
        let mut cursor = 0_i64;

        loop {
            match self.run_chunk(pool, ctx, &mut cursor).await {
                Ok(Some(chunk)) => {
                    report.absorb(&chunk);
                    info!(
                        chunk = report.commit_count,
                        read = chunk.read_count,
                        written = chunk.write_count,
                        skipped = chunk.skip_count,
                        cursor,
                        "chunk committed"
                    );
                }
                Ok(None) => return Ok(report),
                Err(source) => return Err(StepFailure { report, source }),
            }
        }
    }
}

pub struct TaskletStep<T> {
    name: String,
    tasklet: T,
}

impl<T: Tasklet> TaskletStep<T> {
    pub fn new(name: impl Into<String>, tasklet: T) -> Self {
        Self {
            name: name.into(),
            tasklet,
        }
    }

    async fn run_once(&self, pool: &Pool, ctx: &JobContext) -> Result<StepReport> {
        let mut tx = pool.begin().await?;
        let mut report = self.tasklet.execute(&mut *tx, ctx).await?;
        tx.commit().await?;
        report.commit_count = 1;
        Ok(report)
    }
}

#[async_trait]
impl<T: Tasklet> Step for TaskletStep<T> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(step = %self.name, run_key = %ctx.run_key))]
    async fn run(&self, pool: &Pool, ctx: &JobContext) -> Result<StepReport, StepFailure> {
        let report = self.run_once(pool, ctx).await?;
        info!(
            read = report.read_count,
            written = report.write_count,
            "tasklet committed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use anyhow::bail;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Row(i64);

    impl Keyed for Row {
        fn seq(&self) -> i64 {
            self.0
        }
    }

    /// Serves ids 1..=total from memory and records every written chunk.
    #[derive(Default)]
    struct CountingStep {
        total: i64,
        drop_even: bool,
        /// `process` fails for this id.
        bad_item: Option<i64>,
        skip_bad: bool,
        /// `write` fails on this (1-based) chunk.
        fail_chunk: Option<usize>,
        chunks: Mutex<Vec<Vec<i64>>>,
    }

    #[async_trait]
    impl ChunkStep for CountingStep {
        type Item = Row;
        type Output = i64;

        async fn read(
            &self,
            _conn: &mut SqliteConnection,
            _ctx: &JobContext,
            after_seq: i64,
            limit: i64,
        ) -> Result<Vec<Row>> {
            Ok((after_seq + 1..=self.total).take(limit as usize).map(Row).collect())
        }

        async fn process(&self, _ctx: &JobContext, item: Row) -> Result<Option<i64>> {
            if self.bad_item == Some(item.0) {
                bail!("cannot process {}", item.0);
            }
            if self.drop_even && item.0 % 2 == 0 {
                return Ok(None);
            }
            Ok(Some(item.0))
        }

        async fn write(
            &self,
            _conn: &mut SqliteConnection,
            _ctx: &JobContext,
            items: Vec<i64>,
        ) -> Result<u64> {
            let mut chunks = self.chunks.lock().unwrap();
            if self.fail_chunk == Some(chunks.len() + 1) {
                bail!("write rejected");
            }
            let n = items.len() as u64;
            chunks.push(items);
            Ok(n)
        }

        fn skip_on_process_error(&self) -> bool {
            self.skip_bad
        }
    }

    fn ctx() -> JobContext {
        JobContext {
            run_id: 1,
            run_key: "test".into(),
            job_name: "test".into(),
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn chunk_loop_pages_without_gaps() {
        let pool = db::connect_in_memory().await.unwrap();
        let step = ChunkOrientedStep::new(
            "counting",
            5,
            CountingStep {
                total: 12,
                ..Default::default()
            },
        );

        let report = step.run(&pool, &ctx()).await.unwrap();
        assert_eq!(report.read_count, 12);
        assert_eq!(report.write_count, 12);
        assert_eq!(report.commit_count, 3);

        let chunks = step.inner.chunks.lock().unwrap().clone();
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![5, 5, 2]);
        let all: Vec<i64> = chunks.into_iter().flatten().collect();
        assert_eq!(all, (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn filtered_items_are_counted_not_written() {
        let pool = db::connect_in_memory().await.unwrap();
        let step = ChunkOrientedStep::new(
            "odd-only",
            4,
            CountingStep {
                total: 8,
                drop_even: true,
                ..Default::default()
            },
        );

        let report = step.run(&pool, &ctx()).await.unwrap();
        assert_eq!(report.read_count, 8);
        assert_eq!(report.filter_count, 4);
        assert_eq!(report.skip_count, 0);
        assert_eq!(report.write_count, 4);
        assert_eq!(report.commit_count, 2);
    }

    #[tokio::test]
    async fn empty_reader_commits_nothing() {
        let pool = db::connect_in_memory().await.unwrap();
        let step = ChunkOrientedStep::new("empty", 5, CountingStep::default());
        let report = step.run(&pool, &ctx()).await.unwrap();
        assert_eq!(report, StepReport::default());
    }

    #[tokio::test]
    async fn failed_write_keeps_committed_counts() {
        let pool = db::connect_in_memory().await.unwrap();
        let step = ChunkOrientedStep::new(
            "second-chunk-fails",
            5,
            CountingStep {
                total: 12,
                fail_chunk: Some(2),
                ..Default::default()
            },
        );

        let failure = step.run(&pool, &ctx()).await.unwrap_err();
        assert_eq!(failure.source.to_string(), "write rejected");
        assert_eq!(
            failure.report,
            StepReport {
                read_count: 5,
                write_count: 5,
                commit_count: 1,
                ..StepReport::default()
            }
        );
        assert_eq!(step.inner.chunks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn process_error_fails_step_unless_skippable() {
        let pool = db::connect_in_memory().await.unwrap();
        let strict = ChunkOrientedStep::new(
            "strict",
            5,
            CountingStep {
                total: 8,
                bad_item: Some(7),
                ..Default::default()
            },
        );
        let failure = strict.run(&pool, &ctx()).await.unwrap_err();
        assert_eq!(failure.report.commit_count, 1);
        assert!(failure.to_string().contains("cannot process 7"));

        let lenient = ChunkOrientedStep::new(
            "lenient",
            5,
            CountingStep {
                total: 8,
                bad_item: Some(7),
                skip_bad: true,
                ..Default::default()
            },
        );
        let report = lenient.run(&pool, &ctx()).await.unwrap();
        assert_eq!(report.read_count, 8);
        assert_eq!(report.skip_count, 1);
        assert_eq!(report.filter_count, 0);
        assert_eq!(report.write_count, 7);
    }
}
