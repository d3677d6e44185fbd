use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PassStatus {
    Ready,
    InProgress,
    Expired,
}

impl PassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassStatus::Ready => "READY",
            PassStatus::InProgress => "IN_PROGRESS",
            PassStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(PassStatus::Ready),
            "IN_PROGRESS" => Some(PassStatus::InProgress),
            "EXPIRED" => Some(PassStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BulkPassStatus {
    Ready,
    Processed,
}

impl BulkPassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkPassStatus::Ready => "READY",
            BulkPassStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(BulkPassStatus::Ready),
            "PROCESSED" => Some(BulkPassStatus::Processed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(UserStatus::Active),
            "INACTIVE" => Some(UserStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookingStatus {
    Ready,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Ready => "READY",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(BookingStatus::Ready),
            "COMPLETED" => Some(BookingStatus::Completed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationEvent {
    BeforeClass,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::BeforeClass => "BEFORE_CLASS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BEFORE_CLASS" => Some(NotificationEvent::BeforeClass),
            _ => None,
        }
    }
}

/// Outcome recorded for a job run or a step run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "STARTED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(RunStatus::Started),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub user_name: String,
    pub status: UserStatus,
    pub phone: Option<String>,
    pub meta: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl User {
    /// Messenger identifier used for class notifications, stored under `meta.uuid`.
    pub fn messenger_uuid(&self) -> Option<&str> {
        self.meta
            .get("uuid")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub package_seq: i64,
    pub package_name: String,
    /// Usage allowance; `None` means unlimited.
    pub count: Option<i32>,
    /// Validity in days; `None` means unlimited.
    pub period: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pass {
    pub pass_seq: i64,
    pub package_seq: i64,
    pub user_id: String,
    pub status: PassStatus,
    pub remaining_count: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A pass that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPass {
    pub package_seq: i64,
    pub user_id: String,
    pub status: PassStatus,
    pub remaining_count: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkPass {
    pub bulk_pass_seq: i64,
    pub package_seq: i64,
    pub user_group_id: String,
    pub status: BulkPassStatus,
    pub count: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroupMapping {
    pub user_group_id: String,
    pub user_id: String,
    pub user_group_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub booking_seq: i64,
    pub pass_seq: i64,
    pub user_id: String,
    pub status: BookingStatus,
    pub used_pass: bool,
    pub attended: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_seq: i64,
    pub booking_seq: i64,
    pub user_id: String,
    pub uuid: Option<String>,
    pub event: NotificationEvent,
    pub text: String,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

/// A notification built from a booking, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub booking_seq: i64,
    pub user_id: String,
    pub uuid: Option<String>,
    pub event: NotificationEvent,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub run_id: i64,
    pub run_key: String,
    pub job_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_message: Option<String>,
}

/// One executed step of a job run, as recorded in `step_runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub step_run_id: i64,
    pub run_id: i64,
    pub step_name: String,
    pub status: RunStatus,
    pub read_count: i64,
    pub filter_count: i64,
    pub skip_count: i64,
    pub write_count: i64,
    pub commit_count: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub exit_message: Option<String>,
}
