use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use pass_batch::batch::JobLauncher;
use pass_batch::config::ClassNotifications;
use pass_batch::db;
use pass_batch::jobs::class_notifications;
use pass_batch::model::{BookingStatus, NewPass, PassStatus, RunStatus, UserStatus};
use pass_batch::notifier::NotificationSender;
use serde_json::{json, Map};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    db::connect_in_memory().await.unwrap()
}

#[derive(Clone, Default)]
struct RecordingSender {
    responses: Arc<Mutex<VecDeque<Result<()>>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingSender {
    fn with_responses(responses: Vec<Result<()>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, uuid: &str, text: &str) -> Result<()> {
        self.calls
            .lock()
            .await
            .push((uuid.to_string(), text.to_string()));
        self.responses.lock().await.pop_front().unwrap_or(Ok(()))
    }
}

/// Creates a user (optionally with a messenger uuid) holding one pass; returns the pass id.
async fn user_with_pass(pool: &sqlx::SqlitePool, package: i64, user_id: &str, uuid: Option<&str>) -> i64 {
    let mut meta = Map::new();
    if let Some(uuid) = uuid {
        meta.insert("uuid".into(), json!(uuid));
    }
    db::insert_user(pool, user_id, "Member", UserStatus::Active, Some("010-0000-0000"), &meta)
        .await
        .unwrap();

    let now = Utc::now();
    let mut conn = pool.acquire().await.unwrap();
    db::insert_passes(
        &mut conn,
        &[NewPass {
            package_seq: package,
            user_id: user_id.to_string(),
            status: PassStatus::InProgress,
            remaining_count: Some(10),
            started_at: now - Duration::days(1),
            ended_at: Some(now + Duration::days(30)),
        }],
        now,
    )
    .await
    .unwrap();
    drop(conn);

    db::find_passes_by_user(pool, user_id).await.unwrap()[0].pass_seq
}

fn cfg() -> ClassNotifications {
    ClassNotifications {
        chunk_size: 10,
        lead_minutes: 10,
        utc_offset_minutes: 0,
    }
}

fn launcher(pool: &sqlx::SqlitePool) -> JobLauncher {
    JobLauncher::new(pool.clone(), Duration::hours(2))
}

#[tokio::test]
async fn test_due_bookings_are_queued_and_sent() {
    let pool = setup_pool().await;
    let now = Utc::now();
    let package = db::insert_package(&pool, "Group PT", Some(10), Some(30))
        .await
        .unwrap();
    let p1 = user_with_pass(&pool, package, "U1", Some("kakao-U1")).await;
    let p2 = user_with_pass(&pool, package, "U2", None).await;

    let class = |mins: i64| (now + Duration::minutes(mins), now + Duration::minutes(mins + 50));
    let (s, e) = class(5);
    let due = db::insert_booking(&pool, p1, "U1", BookingStatus::Ready, s, e).await.unwrap();
    let (s, e) = class(8);
    let no_uuid = db::insert_booking(&pool, p2, "U2", BookingStatus::Ready, s, e).await.unwrap();
    let (s, e) = class(30);
    db::insert_booking(&pool, p1, "U1", BookingStatus::Ready, s, e).await.unwrap();
    let (s, e) = class(5);
    db::insert_booking(&pool, p1, "U1", BookingStatus::Cancelled, s, e).await.unwrap();
    let (s, e) = class(-30);
    db::insert_booking(&pool, p1, "U1", BookingStatus::Ready, s, e).await.unwrap();

    let sender = RecordingSender::default();
    let job = class_notifications::job(&cfg(), Arc::new(sender.clone()));
    let report = launcher(&pool).run(&job, now).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.steps.len(), 2);

    let add = &report.steps[0];
    assert_eq!(add.name, class_notifications::ADD_STEP_NAME);
    assert_eq!(add.report.read_count, 2);
    assert_eq!(add.report.write_count, 2);

    let send = &report.steps[1];
    assert_eq!(send.name, class_notifications::SEND_STEP_NAME);
    assert_eq!(send.report.read_count, 2);
    assert_eq!(send.report.filter_count, 1);
    assert_eq!(send.report.skip_count, 0);
    assert_eq!(send.report.write_count, 1);

    let calls = sender.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "kakao-U1");
    assert!(calls[0].1.contains("check in"));

    let notifications = db::list_notifications(&pool).await.unwrap();
    assert_eq!(notifications.len(), 2);
    let sent = notifications.iter().find(|n| n.booking_seq == due).unwrap();
    assert!(sent.sent);
    assert!(sent.sent_at.is_some());
    let unsent = notifications.iter().find(|n| n.booking_seq == no_uuid).unwrap();
    assert!(!unsent.sent);
    assert!(unsent.uuid.is_none());
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_notifications() {
    let pool = setup_pool().await;
    let now = Utc::now();
    let package = db::insert_package(&pool, "Spinning", Some(8), Some(30))
        .await
        .unwrap();
    let p1 = user_with_pass(&pool, package, "U1", Some("kakao-U1")).await;
    db::insert_booking(
        &pool,
        p1,
        "U1",
        BookingStatus::Ready,
        now + Duration::minutes(3),
        now + Duration::minutes(53),
    )
    .await
    .unwrap();

    let sender = RecordingSender::default();
    let job = class_notifications::job(&cfg(), Arc::new(sender.clone()));
    launcher(&pool).run(&job, now).await.unwrap();

    let again = launcher(&pool)
        .run(&job, now + Duration::minutes(1))
        .await
        .unwrap();
    assert!(again.is_success());
    assert_eq!(again.steps[0].report.read_count, 1);
    assert_eq!(again.steps[0].report.write_count, 0);
    assert_eq!(again.steps[1].report.read_count, 0);

    assert_eq!(db::list_notifications(&pool).await.unwrap().len(), 1);
    assert_eq!(sender.calls().await.len(), 1);
}

#[tokio::test]
async fn test_failed_delivery_is_retried_next_run() {
    let pool = setup_pool().await;
    let now = Utc::now();
    let package = db::insert_package(&pool, "Crossfit", Some(12), Some(30))
        .await
        .unwrap();
    let p1 = user_with_pass(&pool, package, "U1", Some("kakao-U1")).await;
    db::insert_booking(
        &pool,
        p1,
        "U1",
        BookingStatus::Ready,
        now + Duration::minutes(9),
        now + Duration::minutes(59),
    )
    .await
    .unwrap();

    let sender = RecordingSender::with_responses(vec![Err(anyhow!("gateway timeout"))]);
    let job = class_notifications::job(&cfg(), Arc::new(sender.clone()));

    let first = launcher(&pool).run(&job, now).await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.steps[1].report.filter_count, 0);
    assert_eq!(first.steps[1].report.skip_count, 1);
    assert_eq!(first.steps[1].report.write_count, 0);

    let history = db::step_runs_of(&pool, first.run_id).await.unwrap();
    assert_eq!(history[1].step_name, class_notifications::SEND_STEP_NAME);
    assert_eq!(history[1].status, RunStatus::Completed);
    assert_eq!((history[1].filter_count, history[1].skip_count), (0, 1));
    assert!(!db::list_notifications(&pool).await.unwrap()[0].sent);

    let second = launcher(&pool)
        .run(&job, now + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(second.steps[1].report.write_count, 1);
    assert!(db::list_notifications(&pool).await.unwrap()[0].sent);
    assert_eq!(sender.calls().await.len(), 2);
}
