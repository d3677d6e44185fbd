use super::model::{DueBooking, PageRequest};
use crate::model::{
    Booking, BookingStatus, BulkPass, BulkPassStatus, JobRun, NewNotification, NewPass,
    Notification, NotificationEvent, Package, Pass, PassStatus, RunStatus, StepRun, User,
    UserGroupMapping, UserStatus,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Rows per multi-row INSERT; keeps bind counts well under SQLite's variable limit.
const INSERT_BATCH_ROWS: usize = 500;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Single-connection in-memory database with migrations applied.
///
/// Every pooled connection to `sqlite::memory:` opens its own database, so the
/// pool is capped at one connection and never recycles it.
pub async fn connect_in_memory() -> Result<Pool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn parse_column<T>(row: &SqliteRow, column: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    let raw: String = row.try_get(column)?;
    parse(&raw).ok_or_else(|| anyhow!("unknown {column} value {raw}"))
}

fn user_from_row(row: &SqliteRow, prefix: &str) -> Result<User> {
    let col = |name: &str| format!("{prefix}{name}");
    let meta: Option<Json<Map<String, Value>>> = row.try_get(col("meta").as_str())?;
    Ok(User {
        user_id: row.try_get(col("user_id").as_str())?,
        user_name: row.try_get(col("user_name").as_str())?,
        status: parse_column(row, &col("status"), UserStatus::parse)?,
        phone: row.try_get(col("phone").as_str())?,
        meta: meta.map(|m| m.0).unwrap_or_default(),
        created_at: row.try_get(col("created_at").as_str())?,
        modified_at: row.try_get(col("modified_at").as_str())?,
    })
}

fn package_from_row(row: &SqliteRow) -> Result<Package> {
    Ok(Package {
        package_seq: row.try_get("package_seq")?,
        package_name: row.try_get("package_name")?,
        count: row.try_get("count")?,
        period: row.try_get("period")?,
        created_at: row.try_get("created_at")?,
        modified_at: row.try_get("modified_at")?,
    })
}

fn pass_from_row(row: &SqliteRow) -> Result<Pass> {
    Ok(Pass {
        pass_seq: row.try_get("pass_seq")?,
        package_seq: row.try_get("package_seq")?,
        user_id: row.try_get("user_id")?,
        status: parse_column(row, "status", PassStatus::parse)?,
        remaining_count: row.try_get("remaining_count")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        expired_at: row.try_get("expired_at")?,
        created_at: row.try_get("created_at")?,
        modified_at: row.try_get("modified_at")?,
    })
}

fn bulk_pass_from_row(row: &SqliteRow) -> Result<BulkPass> {
    Ok(BulkPass {
        bulk_pass_seq: row.try_get("bulk_pass_seq")?,
        package_seq: row.try_get("package_seq")?,
        user_group_id: row.try_get("user_group_id")?,
        status: parse_column(row, "status", BulkPassStatus::parse)?,
        count: row.try_get("count")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        created_at: row.try_get("created_at")?,
        modified_at: row.try_get("modified_at")?,
    })
}

fn booking_from_row(row: &SqliteRow) -> Result<Booking> {
    Ok(Booking {
        booking_seq: row.try_get("booking_seq")?,
        pass_seq: row.try_get("pass_seq")?,
        user_id: row.try_get("user_id")?,
        status: parse_column(row, "status", BookingStatus::parse)?,
        used_pass: row.try_get("used_pass")?,
        attended: row.try_get("attended")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    Ok(Notification {
        notification_seq: row.try_get("notification_seq")?,
        booking_seq: row.try_get("booking_seq")?,
        user_id: row.try_get("user_id")?,
        uuid: row.try_get("uuid")?,
        event: parse_column(row, "event", NotificationEvent::parse)?,
        text: row.try_get("text")?,
        sent: row.try_get("sent")?,
        sent_at: row.try_get("sent_at")?,
    })
}

fn step_run_from_row(row: &SqliteRow) -> Result<StepRun> {
    Ok(StepRun {
        step_run_id: row.try_get("step_run_id")?,
        run_id: row.try_get("run_id")?,
        step_name: row.try_get("step_name")?,
        status: parse_column(row, "status", RunStatus::parse)?,
        read_count: row.try_get("read_count")?,
        filter_count: row.try_get("filter_count")?,
        skip_count: row.try_get("skip_count")?,
        write_count: row.try_get("write_count")?,
        commit_count: row.try_get("commit_count")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        exit_message: row.try_get("exit_message")?,
    })
}

fn job_run_from_row(row: &SqliteRow) -> Result<JobRun> {
    Ok(JobRun {
        run_id: row.try_get("run_id")?,
        run_key: row.try_get("run_key")?,
        job_name: row.try_get("job_name")?,
        status: parse_column(row, "status", RunStatus::parse)?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        exit_message: row.try_get("exit_message")?,
    })
}

#[instrument(skip_all)]
pub async fn insert_user(
    pool: &Pool,
    user_id: &str,
    user_name: &str,
    status: UserStatus,
    phone: Option<&str>,
    meta: &Map<String, Value>,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (user_id, user_name, status, phone, meta, created_at, modified_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(user_name)
    .bind(status.as_str())
    .bind(phone)
    .bind(Json(meta))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("failed to insert user {user_id}"))?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn find_user(pool: &Pool, user_id: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT user_id, user_name, status, phone, meta, created_at, modified_at \
         FROM users WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| user_from_row(&r, "")).transpose()
}

#[instrument(skip_all)]
pub async fn insert_package(
    pool: &Pool,
    package_name: &str,
    count: Option<i32>,
    period: Option<i32>,
) -> Result<i64> {
    let now = Utc::now();
    let id: i64 = sqlx::query(
        "INSERT INTO packages (package_name, count, period, created_at, modified_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING package_seq",
    )
    .bind(package_name)
    .bind(count)
    .bind(period)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?
    .get("package_seq");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn find_package(conn: &mut SqliteConnection, package_seq: i64) -> Result<Option<Package>> {
    let row = sqlx::query(
        "SELECT package_seq, package_name, count, period, created_at, modified_at \
         FROM packages WHERE package_seq = ?",
    )
    .bind(package_seq)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(package_from_row).transpose()
}

/// Packages created strictly after `after`, ordered by sequence id.
#[instrument(skip_all)]
pub async fn find_packages_created_after(
    pool: &Pool,
    after: DateTime<Utc>,
    page: PageRequest,
) -> Result<Vec<Package>> {
    let sql = format!(
        "SELECT package_seq, package_name, count, period, created_at, modified_at \
         FROM packages WHERE julianday(created_at) > julianday(?) \
         ORDER BY package_seq {} LIMIT ? OFFSET ?",
        page.direction.as_sql()
    );
    let rows = sqlx::query(&sql)
        .bind(after)
        .bind(i64::from(page.size))
        .bind(page.offset())
        .fetch_all(pool)
        .await?;
    rows.iter().map(package_from_row).collect()
}

/// Insert all passes in multi-row statements. Returns the number of rows written.
#[instrument(skip_all, fields(count = passes.len()))]
pub async fn insert_passes(
    conn: &mut SqliteConnection,
    passes: &[NewPass],
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut written = 0;
    for batch in passes.chunks(INSERT_BATCH_ROWS) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO passes (package_seq, user_id, status, remaining_count, started_at, \
             ended_at, created_at, modified_at) ",
        );
        qb.push_values(batch, |mut b, p| {
            b.push_bind(p.package_seq)
                .push_bind(p.user_id.clone())
                .push_bind(p.status.as_str())
                .push_bind(p.remaining_count)
                .push_bind(p.started_at)
                .push_bind(p.ended_at)
                .push_bind(now)
                .push_bind(now);
        });
        written += qb
            .build()
            .execute(&mut *conn)
            .await
            .context("failed to insert passes")?
            .rows_affected();
    }
    Ok(written)
}

/// Next page of passes in `status` whose end time is at or before `ended_before`.
#[instrument(skip_all)]
pub async fn find_passes_ended_by(
    conn: &mut SqliteConnection,
    status: PassStatus,
    ended_before: DateTime<Utc>,
    after_seq: i64,
    limit: i64,
) -> Result<Vec<Pass>> {
    let rows = sqlx::query(
        "SELECT pass_seq, package_seq, user_id, status, remaining_count, started_at, ended_at, \
                expired_at, created_at, modified_at \
         FROM passes \
         WHERE status = ? AND ended_at IS NOT NULL \
           AND julianday(ended_at) <= julianday(?) AND pass_seq > ? \
         ORDER BY pass_seq LIMIT ?",
    )
    .bind(status.as_str())
    .bind(ended_before)
    .bind(after_seq)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(pass_from_row).collect()
}

/// Write back status and expiry of each pass, stamping `modified_at`.
#[instrument(skip_all)]
pub async fn update_pass_states(
    conn: &mut SqliteConnection,
    passes: &[Pass],
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut written = 0;
    for pass in passes {
        written += sqlx::query(
            "UPDATE passes SET status = ?, expired_at = ?, remaining_count = ?, modified_at = ? \
             WHERE pass_seq = ?",
        )
        .bind(pass.status.as_str())
        .bind(pass.expired_at)
        .bind(pass.remaining_count)
        .bind(now)
        .bind(pass.pass_seq)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to update pass {}", pass.pass_seq))?
        .rows_affected();
    }
    Ok(written)
}

#[instrument(skip_all)]
pub async fn find_passes_by_user(pool: &Pool, user_id: &str) -> Result<Vec<Pass>> {
    let rows = sqlx::query(
        "SELECT pass_seq, package_seq, user_id, status, remaining_count, started_at, ended_at, \
                expired_at, created_at, modified_at \
         FROM passes WHERE user_id = ? ORDER BY pass_seq",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(pass_from_row).collect()
}

#[instrument(skip_all)]
pub async fn find_pass(pool: &Pool, pass_seq: i64) -> Result<Option<Pass>> {
    let row = sqlx::query(
        "SELECT pass_seq, package_seq, user_id, status, remaining_count, started_at, ended_at, \
                expired_at, created_at, modified_at \
         FROM passes WHERE pass_seq = ?",
    )
    .bind(pass_seq)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(pass_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn insert_bulk_pass(
    pool: &Pool,
    package_seq: i64,
    user_group_id: &str,
    count: Option<i32>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
) -> Result<i64> {
    let now = Utc::now();
    let id: i64 = sqlx::query(
        "INSERT INTO bulk_passes (package_seq, user_group_id, status, count, started_at, ended_at, \
         created_at, modified_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING bulk_pass_seq",
    )
    .bind(package_seq)
    .bind(user_group_id)
    .bind(BulkPassStatus::Ready.as_str())
    .bind(count)
    .bind(started_at)
    .bind(ended_at)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?
    .get("bulk_pass_seq");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn find_bulk_passes_started_after(
    conn: &mut SqliteConnection,
    status: BulkPassStatus,
    started_after: DateTime<Utc>,
) -> Result<Vec<BulkPass>> {
    let rows = sqlx::query(
        "SELECT bulk_pass_seq, package_seq, user_group_id, status, count, started_at, ended_at, \
                created_at, modified_at \
         FROM bulk_passes WHERE status = ? AND julianday(started_at) > julianday(?) \
         ORDER BY bulk_pass_seq",
    )
    .bind(status.as_str())
    .bind(started_after)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(bulk_pass_from_row).collect()
}

#[instrument(skip_all)]
pub async fn update_bulk_pass_status(
    conn: &mut SqliteConnection,
    bulk_pass_seq: i64,
    status: BulkPassStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE bulk_passes SET status = ?, modified_at = ? WHERE bulk_pass_seq = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(bulk_pass_seq)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to update bulk pass {bulk_pass_seq}"))?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn find_bulk_pass(pool: &Pool, bulk_pass_seq: i64) -> Result<Option<BulkPass>> {
    let row = sqlx::query(
        "SELECT bulk_pass_seq, package_seq, user_group_id, status, count, started_at, ended_at, \
                created_at, modified_at \
         FROM bulk_passes WHERE bulk_pass_seq = ?",
    )
    .bind(bulk_pass_seq)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(bulk_pass_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn insert_group_member(pool: &Pool, mapping: &UserGroupMapping) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO user_group_mappings (user_group_id, user_id, user_group_name, description, \
         created_at, modified_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&mapping.user_group_id)
    .bind(&mapping.user_id)
    .bind(&mapping.user_group_name)
    .bind(&mapping.description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn find_group_members(
    conn: &mut SqliteConnection,
    user_group_id: &str,
) -> Result<Vec<UserGroupMapping>> {
    let rows = sqlx::query(
        "SELECT user_group_id, user_id, user_group_name, description \
         FROM user_group_mappings WHERE user_group_id = ? ORDER BY user_id",
    )
    .bind(user_group_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| -> Result<UserGroupMapping> {
            Ok(UserGroupMapping {
                user_group_id: row.try_get("user_group_id")?,
                user_id: row.try_get("user_id")?,
                user_group_name: row.try_get("user_group_name")?,
                description: row.try_get("description")?,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn insert_booking(
    pool: &Pool,
    pass_seq: i64,
    user_id: &str,
    status: BookingStatus,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
) -> Result<i64> {
    let now = Utc::now();
    let id: i64 = sqlx::query(
        "INSERT INTO bookings (pass_seq, user_id, status, started_at, ended_at, created_at, \
         modified_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING booking_seq",
    )
    .bind(pass_seq)
    .bind(user_id)
    .bind(status.as_str())
    .bind(started_at)
    .bind(ended_at)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?
    .get("booking_seq");
    Ok(id)
}

/// Next page of bookings in `status` starting within `[from, until]`, joined with their user.
#[instrument(skip_all)]
pub async fn find_bookings_starting_between(
    conn: &mut SqliteConnection,
    status: BookingStatus,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    after_seq: i64,
    limit: i64,
) -> Result<Vec<DueBooking>> {
    let rows = sqlx::query(
        "SELECT b.booking_seq, b.pass_seq, b.user_id, b.status, b.used_pass, b.attended, \
                b.started_at, b.ended_at, b.cancelled_at, \
                u.user_id AS u_user_id, u.user_name AS u_user_name, u.status AS u_status, \
                u.phone AS u_phone, u.meta AS u_meta, u.created_at AS u_created_at, \
                u.modified_at AS u_modified_at \
         FROM bookings b JOIN users u ON u.user_id = b.user_id \
         WHERE b.status = ? \
           AND julianday(b.started_at) >= julianday(?) \
           AND julianday(b.started_at) <= julianday(?) \
           AND b.booking_seq > ? \
         ORDER BY b.booking_seq LIMIT ?",
    )
    .bind(status.as_str())
    .bind(from)
    .bind(until)
    .bind(after_seq)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| -> Result<DueBooking> {
            Ok(DueBooking {
                booking: booking_from_row(row)?,
                user: user_from_row(row, "u_")?,
            })
        })
        .collect()
}

/// Insert notifications, skipping any (booking, event) pair that already exists.
/// Returns the number of rows actually inserted.
#[instrument(skip_all)]
pub async fn insert_notifications_if_absent(
    conn: &mut SqliteConnection,
    notifications: &[NewNotification],
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut written = 0;
    for batch in notifications.chunks(INSERT_BATCH_ROWS) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO notifications (booking_seq, user_id, uuid, event, text, sent, \
             created_at, modified_at) ",
        );
        qb.push_values(batch, |mut b, n| {
            b.push_bind(n.booking_seq)
                .push_bind(n.user_id.clone())
                .push_bind(n.uuid.clone())
                .push_bind(n.event.as_str())
                .push_bind(n.text.clone())
                .push_bind(false)
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(" ON CONFLICT (booking_seq, event) DO NOTHING");
        written += qb
            .build()
            .execute(&mut *conn)
            .await
            .context("failed to insert notifications")?
            .rows_affected();
    }
    Ok(written)
}

#[instrument(skip_all)]
pub async fn find_unsent_notifications(
    conn: &mut SqliteConnection,
    event: NotificationEvent,
    after_seq: i64,
    limit: i64,
) -> Result<Vec<Notification>> {
    let rows = sqlx::query(
        "SELECT notification_seq, booking_seq, user_id, uuid, event, text, sent, sent_at \
         FROM notifications WHERE event = ? AND sent = 0 AND notification_seq > ? \
         ORDER BY notification_seq LIMIT ?",
    )
    .bind(event.as_str())
    .bind(after_seq)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(notification_from_row).collect()
}

#[instrument(skip_all)]
pub async fn mark_notifications_sent(
    conn: &mut SqliteConnection,
    notifications: &[Notification],
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut written = 0;
    for n in notifications {
        written += sqlx::query(
            "UPDATE notifications SET sent = ?, sent_at = ?, modified_at = ? \
             WHERE notification_seq = ?",
        )
        .bind(n.sent)
        .bind(n.sent_at)
        .bind(now)
        .bind(n.notification_seq)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to update notification {}", n.notification_seq))?
        .rows_affected();
    }
    Ok(written)
}

#[instrument(skip_all)]
pub async fn list_notifications(pool: &Pool) -> Result<Vec<Notification>> {
    let rows = sqlx::query(
        "SELECT notification_seq, booking_seq, user_id, uuid, event, text, sent, sent_at \
         FROM notifications ORDER BY notification_seq",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(notification_from_row).collect()
}

#[instrument(skip_all)]
pub async fn start_job_run(
    pool: &Pool,
    run_key: &str,
    job_name: &str,
    started_at: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO job_runs (run_key, job_name, status, started_at) VALUES (?, ?, ?, ?) \
         RETURNING run_id",
    )
    .bind(run_key)
    .bind(job_name)
    .bind(RunStatus::Started.as_str())
    .bind(started_at)
    .fetch_one(pool)
    .await
    .context("failed to record job start")?
    .get("run_id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn finish_job_run(
    pool: &Pool,
    run_id: i64,
    status: RunStatus,
    ended_at: DateTime<Utc>,
    exit_message: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE job_runs SET status = ?, ended_at = ?, exit_message = ? WHERE run_id = ?")
        .bind(status.as_str())
        .bind(ended_at)
        .bind(exit_message)
        .bind(run_id)
        .execute(pool)
        .await
        .context("failed to record job end")?;
    Ok(())
}

/// One executed step as stored in `step_runs`.
#[derive(Debug, Clone)]
pub struct StepRunRecord<'a> {
    pub run_id: i64,
    pub step_name: &'a str,
    pub status: RunStatus,
    pub read_count: u64,
    pub filter_count: u64,
    pub skip_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub exit_message: Option<&'a str>,
}

#[instrument(skip_all)]
pub async fn insert_step_run(pool: &Pool, rec: &StepRunRecord<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO step_runs (run_id, step_name, status, read_count, filter_count, skip_count, \
         write_count, commit_count, started_at, ended_at, exit_message) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(rec.run_id)
    .bind(rec.step_name)
    .bind(rec.status.as_str())
    .bind(rec.read_count as i64)
    .bind(rec.filter_count as i64)
    .bind(rec.skip_count as i64)
    .bind(rec.write_count as i64)
    .bind(rec.commit_count as i64)
    .bind(rec.started_at)
    .bind(rec.ended_at)
    .bind(rec.exit_message)
    .execute(pool)
    .await
    .context("failed to record step run")?;
    Ok(())
}

/// Most recent STARTED run of `job_name` that began after `since`.
#[instrument(skip_all)]
pub async fn find_running_job(
    pool: &Pool,
    job_name: &str,
    since: DateTime<Utc>,
) -> Result<Option<JobRun>> {
    let row = sqlx::query(
        "SELECT run_id, run_key, job_name, status, started_at, ended_at, exit_message \
         FROM job_runs WHERE job_name = ? AND status = ? AND julianday(started_at) > julianday(?) \
         ORDER BY run_id DESC LIMIT 1",
    )
    .bind(job_name)
    .bind(RunStatus::Started.as_str())
    .bind(since)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(job_run_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn latest_job_runs(pool: &Pool, limit: i64) -> Result<Vec<JobRun>> {
    let rows = sqlx::query(
        "SELECT run_id, run_key, job_name, status, started_at, ended_at, exit_message \
         FROM job_runs ORDER BY run_id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(job_run_from_row).collect()
}

/// Step rows of one run, in execution order.
#[instrument(skip_all)]
pub async fn step_runs_of(pool: &Pool, run_id: i64) -> Result<Vec<StepRun>> {
    let rows = sqlx::query(
        "SELECT step_run_id, run_id, step_name, status, read_count, filter_count, skip_count, \
                write_count, commit_count, started_at, ended_at, exit_message \
         FROM step_runs WHERE run_id = ? ORDER BY step_run_id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(step_run_from_row).collect()
}
