use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::info;

use nanoclaw_types::{ScheduleKind, ScheduledTask, TaskStatus};

use crate::db::{RegistryError, RegistryResult};

/// Scheduled planner turns. The scheduler is the only writer of `next_run`
/// and run-derived status; the IPC watcher writes pause/resume/cancel.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn create(&self, task: &ScheduledTask) -> RegistryResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO scheduled_tasks
             (id, group_folder, chat_id, prompt, schedule_kind, schedule_value, status, next_run, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id,
                task.group_folder,
                task.chat_id,
                task.prompt,
                task.schedule_kind.as_str(),
                task.schedule_value,
                task.status.as_str(),
                task.next_run.map(|t| t.to_rfc3339()),
                task.created_at.to_rfc3339(),
            ],
        )?;
        info!(task_id = %task.id, folder = %task.group_folder, "task scheduled");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> RegistryResult<Option<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let task = conn
            .query_row(
                "SELECT id, group_folder, chat_id, prompt, schedule_kind, schedule_value,
                        status, next_run, created_at
                 FROM scheduled_tasks WHERE id = ?1",
                params![id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Active tasks whose `next_run` has passed, oldest due first.
    pub async fn due(&self, now: DateTime<Utc>) -> RegistryResult<Vec<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, group_folder, chat_id, prompt, schedule_kind, schedule_value,
                    status, next_run, created_at
             FROM scheduled_tasks
             WHERE status = 'active' AND next_run IS NOT NULL AND next_run <= ?1
             ORDER BY next_run ASC",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    pub async fn set_next_run(
        &self,
        id: &str,
        next_run: Option<DateTime<Utc>>,
    ) -> RegistryResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE scheduled_tasks SET next_run = ?1 WHERE id = ?2",
            params![next_run.map(|t| t.to_rfc3339()), id],
        )?;
        Ok(())
    }

    /// Status transition with the allowed edges only: pause from active,
    /// resume from paused, complete from active, cancel from any
    /// non-terminal state. Returns the updated row, `None` when the task is
    /// missing or the edge is not allowed.
    pub async fn transition(
        &self,
        id: &str,
        to: TaskStatus,
    ) -> RegistryResult<Option<ScheduledTask>> {
        let from_clause = match to {
            TaskStatus::Paused => "status = 'active'",
            TaskStatus::Active => "status = 'paused'",
            TaskStatus::Completed => "status = 'active'",
            TaskStatus::Cancelled => "status IN ('active', 'paused')",
        };
        let changed = {
            let conn = self.conn.lock().await;
            conn.execute(
                &format!("UPDATE scheduled_tasks SET status = ?1 WHERE id = ?2 AND {from_clause}"),
                params![to.as_str(), id],
            )?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    pub async fn list_by_folder(&self, folder: &str) -> RegistryResult<Vec<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, group_folder, chat_id, prompt, schedule_kind, schedule_value,
                    status, next_run, created_at
             FROM scheduled_tasks WHERE group_folder = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![folder], row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let kind: String = row.get(4)?;
    let status: String = row.get(6)?;
    let convert = |e: RegistryError| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    };
    Ok(ScheduledTask {
        id: row.get(0)?,
        group_folder: row.get(1)?,
        chat_id: row.get(2)?,
        prompt: row.get(3)?,
        schedule_kind: parse_kind(&kind).map_err(convert)?,
        schedule_value: row.get(5)?,
        status: parse_task_status(&status).map_err(convert)?,
        next_run: {
            let raw: Option<String> = row.get(7)?;
            match raw {
                None => None,
                Some(raw) => Some(
                    DateTime::parse_from_rfc3339(&raw)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                7,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                ),
            }
        },
        created_at: {
            let raw: String = row.get(8)?;
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        8,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?
        },
    })
}

fn parse_kind(raw: &str) -> Result<ScheduleKind, RegistryError> {
    match raw {
        "cron" => Ok(ScheduleKind::Cron),
        "interval" => Ok(ScheduleKind::Interval),
        "once" => Ok(ScheduleKind::Once),
        other => Err(RegistryError::InvalidRow(format!(
            "unknown schedule kind `{other}`"
        ))),
    }
}

fn parse_task_status(raw: &str) -> Result<TaskStatus, RegistryError> {
    match raw {
        "active" => Ok(TaskStatus::Active),
        "paused" => Ok(TaskStatus::Paused),
        "completed" => Ok(TaskStatus::Completed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(RegistryError::InvalidRow(format!(
            "unknown task status `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Duration;

    fn task(next_run: Option<DateTime<Utc>>) -> ScheduledTask {
        ScheduledTask::new(
            "main",
            "chat-1",
            "check disk",
            ScheduleKind::Cron,
            "0 9 * * *",
            next_run,
        )
    }

    #[tokio::test]
    async fn due_returns_only_ripe_active_tasks() {
        let db = Database::open_in_memory().await.unwrap();
        let tasks = db.tasks();
        let now = Utc::now();

        let ripe = task(Some(now - Duration::minutes(1)));
        let future = task(Some(now + Duration::hours(1)));
        let paused = task(Some(now - Duration::minutes(5)));
        tasks.create(&ripe).await.unwrap();
        tasks.create(&future).await.unwrap();
        tasks.create(&paused).await.unwrap();
        tasks
            .transition(&paused.id, TaskStatus::Paused)
            .await
            .unwrap();

        let due = tasks.due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ripe.id);
    }

    #[tokio::test]
    async fn pause_resume_cancel_edges() {
        let db = Database::open_in_memory().await.unwrap();
        let tasks = db.tasks();
        let t = task(Some(Utc::now()));
        tasks.create(&t).await.unwrap();

        // resume on an active task is not an allowed edge
        assert!(tasks
            .transition(&t.id, TaskStatus::Active)
            .await
            .unwrap()
            .is_none());

        let paused = tasks
            .transition(&t.id, TaskStatus::Paused)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);

        let resumed = tasks
            .transition(&t.id, TaskStatus::Active)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resumed.status, TaskStatus::Active);

        let cancelled = tasks
            .transition(&t.id, TaskStatus::Cancelled)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        // cancelled is terminal
        assert!(tasks
            .transition(&t.id, TaskStatus::Active)
            .await
            .unwrap()
            .is_none());
    }
}
