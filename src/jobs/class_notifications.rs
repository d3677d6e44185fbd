//! Class reminders: queue a notification for every booking about to start,
//! then deliver the queued notifications.

use crate::batch::{ChunkOrientedStep, ChunkStep, Job, JobContext, Keyed};
use crate::config::ClassNotifications as ClassNotificationsConfig;
use crate::db::{self, DueBooking};
use crate::model::{BookingStatus, NewNotification, Notification, NotificationEvent};
use crate::notifier::NotificationSender;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, FixedOffset, Offset, Utc};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::warn;

pub const JOB_NAME: &str = "class_notifications";
pub const ADD_STEP_NAME: &str = "add_notification_step";
pub const SEND_STEP_NAME: &str = "send_notification_step";

const MAX_LEAD_MINUTES: u64 = 60 * 24 * 365;

impl Keyed for DueBooking {
    fn seq(&self) -> i64 {
        self.booking.booking_seq
    }
}

impl Keyed for Notification {
    fn seq(&self) -> i64 {
        self.notification_seq
    }
}

/// Class start is printed in the gym's local time, `offset` from UTC.
pub fn reminder_text(due: &DueBooking, offset: FixedOffset) -> String {
    format!(
        "Your class starts at {}. Please check in before class.",
        due.booking
            .started_at
            .with_timezone(&offset)
            .format("%Y-%m-%d %H:%M")
    )
}

pub fn build_notification(due: &DueBooking, offset: FixedOffset) -> NewNotification {
    NewNotification {
        booking_seq: due.booking.booking_seq,
        user_id: due.user.user_id.clone(),
        uuid: due.user.messenger_uuid().map(str::to_string),
        event: NotificationEvent::BeforeClass,
        text: reminder_text(due, offset),
    }
}

/// Reads READY bookings starting within `lead` of the job clock.
pub struct AddNotificationStep {
    lead: Duration,
    offset: FixedOffset,
}

impl AddNotificationStep {
    pub fn new(lead: Duration, offset: FixedOffset) -> Self {
        Self { lead, offset }
    }
}

#[async_trait]
impl ChunkStep for AddNotificationStep {
    type Item = DueBooking;
    type Output = NewNotification;

    async fn read(
        &self,
        conn: &mut SqliteConnection,
        ctx: &JobContext,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<DueBooking>> {
        db::find_bookings_starting_between(
            conn,
            BookingStatus::Ready,
            ctx.now,
            ctx.now + self.lead,
            after_seq,
            limit,
        )
        .await
    }

    async fn process(&self, _ctx: &JobContext, item: DueBooking) -> Result<Option<NewNotification>> {
        Ok(Some(build_notification(&item, self.offset)))
    }

    async fn write(
        &self,
        conn: &mut SqliteConnection,
        ctx: &JobContext,
        items: Vec<NewNotification>,
    ) -> Result<u64> {
        db::insert_notifications_if_absent(conn, &items, ctx.now).await
    }
}

/// Delivers unsent reminders.
///
/// Reminders without a messenger uuid are filtered. A failed delivery is
/// counted as skipped and stays unsent for the next run.
///
/// Deliveries happen inside the chunk transaction, so a chunk holds its read
/// snapshot for up to `chunk_size` webhook timeouts. Keep the chunk small when
/// other writers share the database file.
pub struct SendNotificationStep {
    sender: Arc<dyn NotificationSender>,
}

impl SendNotificationStep {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ChunkStep for SendNotificationStep {
    type Item = Notification;
    type Output = Notification;

    async fn read(
        &self,
        conn: &mut SqliteConnection,
        _ctx: &JobContext,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        db::find_unsent_notifications(conn, NotificationEvent::BeforeClass, after_seq, limit).await
    }

    async fn process(
        &self,
        ctx: &JobContext,
        mut item: Notification,
    ) -> Result<Option<Notification>> {
        let Some(uuid) = item.uuid.as_deref() else {
            warn!(
                notification = item.notification_seq,
                user = %item.user_id,
                "no messenger uuid; filtered"
            );
            return Ok(None);
        };

        self.sender
            .send(uuid, &item.text)
            .await
            .with_context(|| format!("delivery of notification {} failed", item.notification_seq))?;

        item.sent = true;
        item.sent_at = Some(ctx.now);
        Ok(Some(item))
    }

    async fn write(
        &self,
        conn: &mut SqliteConnection,
        ctx: &JobContext,
        items: Vec<Notification>,
    ) -> Result<u64> {
        db::mark_notifications_sent(conn, &items, ctx.now).await
    }

    fn skip_on_process_error(&self) -> bool {
        true
    }
}

pub fn job(cfg: &ClassNotificationsConfig, sender: Arc<dyn NotificationSender>) -> Job {
    let lead = Duration::minutes(cfg.lead_minutes.min(MAX_LEAD_MINUTES) as i64);
    let offset = FixedOffset::east_opt(cfg.utc_offset_minutes.saturating_mul(60))
        .unwrap_or_else(|| Utc.fix());
    Job::new(JOB_NAME)
        .step(ChunkOrientedStep::new(
            ADD_STEP_NAME,
            cfg.chunk_size,
            AddNotificationStep::new(lead, offset),
        ))
        .step(ChunkOrientedStep::new(
            SEND_STEP_NAME,
            cfg.chunk_size,
            SendNotificationStep::new(sender),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, User, UserStatus};
    use chrono::TimeZone;
    use serde_json::{json, Map};

    fn due(meta: Map<String, serde_json::Value>) -> DueBooking {
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 18, 30, 0).unwrap();
        DueBooking {
            booking: Booking {
                booking_seq: 11,
                pass_seq: 4,
                user_id: "A1000000".into(),
                status: BookingStatus::Ready,
                used_pass: false,
                attended: false,
                started_at: start,
                ended_at: start + Duration::hours(1),
                cancelled_at: None,
            },
            user: User {
                user_id: "A1000000".into(),
                user_name: "Lee".into(),
                status: UserStatus::Active,
                phone: None,
                meta,
                created_at: start,
                modified_at: start,
            },
        }
    }

    #[test]
    fn notification_carries_uuid_and_start_time() {
        let mut meta = Map::new();
        meta.insert("uuid".into(), json!("kakao-1"));
        let n = build_notification(&due(meta), Utc.fix());

        assert_eq!(n.booking_seq, 11);
        assert_eq!(n.user_id, "A1000000");
        assert_eq!(n.uuid.as_deref(), Some("kakao-1"));
        assert_eq!(n.event, NotificationEvent::BeforeClass);
        assert!(n.text.contains("2024-05-02 18:30"));
    }

    #[test]
    fn notification_without_uuid_still_built() {
        let n = build_notification(&due(Map::new()), Utc.fix());
        assert_eq!(n.uuid, None);
    }

    #[test]
    fn reminder_prints_local_class_time() {
        let seoul = FixedOffset::east_opt(9 * 3600).unwrap();
        let text = reminder_text(&due(Map::new()), seoul);
        assert!(text.contains("2024-05-03 03:30"), "{text}");

        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        let text = reminder_text(&due(Map::new()), new_york);
        assert!(text.contains("2024-05-02 13:30"), "{text}");
    }
}
