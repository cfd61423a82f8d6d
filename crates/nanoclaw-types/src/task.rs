use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron,
    Interval,
    Once,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleKind::Cron => "cron",
            ScheduleKind::Interval => "interval",
            ScheduleKind::Once => "once",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// A recurring or one-shot planner turn fired by the scheduler on behalf of
/// a group. `schedule_value` holds the cron expression, the interval in
/// milliseconds, or the RFC 3339 instant, depending on `schedule_kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub group_folder: String,
    pub chat_id: String,
    pub prompt: String,
    pub schedule_kind: ScheduleKind,
    pub schedule_value: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(
        group_folder: impl Into<String>,
        chat_id: impl Into<String>,
        prompt: impl Into<String>,
        schedule_kind: ScheduleKind,
        schedule_value: impl Into<String>,
        next_run: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: format!("task-{}", Uuid::new_v4()),
            group_folder: group_folder.into(),
            chat_id: chat_id.into(),
            prompt: prompt.into(),
            schedule_kind,
            schedule_value: schedule_value.into(),
            status: TaskStatus::Active,
            next_run,
            created_at: Utc::now(),
        }
    }
}
