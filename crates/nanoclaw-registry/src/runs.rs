use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::info;

use nanoclaw_types::{Run, RunStatus, RunUpdate};

use crate::db::{RegistryError, RegistryResult};
use crate::LIST_LIMIT_CAP;

/// Durable record of background tasks. The runner's workers are the only
/// mutators of rows spawned from a dispatch; terminal rows are never
/// rewritten.
#[derive(Clone)]
pub struct RunRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl RunRegistry {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn create(&self, run: &Run) -> RegistryResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO runs (id, action_type, status, created_at, started_at, completed_at,
                               summary, result_text, error_text, cancel_requested)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.id,
                run.action_type,
                run.status.as_str(),
                run.created_at.to_rfc3339(),
                run.started_at.map(|t| t.to_rfc3339()),
                run.completed_at.map(|t| t.to_rfc3339()),
                run.summary,
                run.result_text,
                run.error_text,
                run.cancel_requested as i64,
            ],
        )?;
        info!(run_id = %run.id, action_type = %run.action_type, "run created");
        Ok(())
    }

    /// Apply a partial update. Status changes only land on non-terminal
    /// rows, which keeps the lifecycle monotone even when a worker and a
    /// cancel request race.
    pub async fn update(&self, id: &str, update: RunUpdate) -> RegistryResult<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql + Send>> = Vec::new();

        if let Some(status) = update.status {
            sets.push(format!("status = ?{}", values.len() + 1));
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(started_at) = update.started_at {
            sets.push(format!("started_at = ?{}", values.len() + 1));
            values.push(Box::new(started_at.to_rfc3339()));
        }
        if let Some(completed_at) = update.completed_at {
            sets.push(format!("completed_at = ?{}", values.len() + 1));
            values.push(Box::new(completed_at.to_rfc3339()));
        }
        if let Some(result_text) = update.result_text {
            sets.push(format!("result_text = ?{}", values.len() + 1));
            values.push(Box::new(result_text));
        }
        if let Some(error_text) = update.error_text {
            sets.push(format!("error_text = ?{}", values.len() + 1));
            values.push(Box::new(error_text));
        }
        if let Some(cancel_requested) = update.cancel_requested {
            sets.push(format!("cancel_requested = ?{}", values.len() + 1));
            values.push(Box::new(cancel_requested as i64));
        }
        if sets.is_empty() {
            return Ok(());
        }

        let guard = if update.status.is_some() {
            " AND status NOT IN ('completed', 'failed', 'cancelled')"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE runs SET {} WHERE id = ?{}{guard}",
            sets.join(", "),
            values.len() + 1
        );
        values.push(Box::new(id.to_string()));

        let conn = self.conn.lock().await;
        conn.execute(
            &sql,
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
        )?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> RegistryResult<Option<Run>> {
        let conn = self.conn.lock().await;
        let run = conn
            .query_row(
                "SELECT id, action_type, status, created_at, started_at, completed_at,
                        summary, result_text, error_text, cancel_requested
                 FROM runs WHERE id = ?1",
                params![id],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Newest first, capped at 100 rows per call.
    pub async fn list(&self, limit: usize) -> RegistryResult<Vec<Run>> {
        let limit = limit.min(LIST_LIMIT_CAP);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, action_type, status, created_at, started_at, completed_at,
                    summary, result_text, error_text, cancel_requested
             FROM runs ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_run)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Flag a run for cancellation. Terminal rows stay untouched. Returns
    /// the row as it stands after the flag is set, or `None` for an unknown
    /// id.
    pub async fn request_cancel(&self, id: &str) -> RegistryResult<Option<Run>> {
        {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE runs SET cancel_requested = 1
                 WHERE id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')",
                params![id],
            )?;
        }
        self.get(id).await
    }
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(2)?;
    let status = parse_status(&status)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into()))?;
    Ok(Run {
        id: row.get(0)?,
        action_type: row.get(1)?,
        status,
        created_at: parse_ts(row, 3)?,
        started_at: parse_opt_ts(row, 4)?,
        completed_at: parse_opt_ts(row, 5)?,
        summary: row.get(6)?,
        result_text: row.get(7)?,
        error_text: row.get(8)?,
        cancel_requested: row.get::<_, i64>(9)? != 0,
    })
}

fn parse_status(raw: &str) -> Result<RunStatus, RegistryError> {
    match raw {
        "queued" => Ok(RunStatus::Queued),
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(RegistryError::InvalidRow(format!(
            "unknown run status `{other}`"
        ))),
    }
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn create_get_roundtrip() {
        let db = Database::open_in_memory().await.unwrap();
        let registry = db.runs();
        let run = Run::queued("opencode_serve", Some("refactor module".into()));
        registry.create(&run).await.unwrap();

        let loaded = registry.get(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Queued);
        assert_eq!(loaded.summary.as_deref(), Some("refactor module"));
        assert!(!loaded.cancel_requested);
    }

    #[tokio::test]
    async fn lifecycle_is_monotone() {
        let db = Database::open_in_memory().await.unwrap();
        let registry = db.runs();
        let run = Run::queued("opencode_serve", None);
        registry.create(&run).await.unwrap();

        registry
            .update(
                &run.id,
                RunUpdate {
                    status: Some(RunStatus::Running),
                    started_at: Some(Utc::now()),
                    ..RunUpdate::default()
                },
            )
            .await
            .unwrap();
        registry
            .update(
                &run.id,
                RunUpdate {
                    status: Some(RunStatus::Cancelled),
                    completed_at: Some(Utc::now()),
                    ..RunUpdate::default()
                },
            )
            .await
            .unwrap();

        // A late worker completion must not resurrect a cancelled run.
        registry
            .update(
                &run.id,
                RunUpdate {
                    status: Some(RunStatus::Completed),
                    result_text: Some("late".into()),
                    ..RunUpdate::default()
                },
            )
            .await
            .unwrap();
        let loaded = registry.get(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_capped() {
        let db = Database::open_in_memory().await.unwrap();
        let registry = db.runs();
        for i in 0..5 {
            let mut run = Run::queued("opencode_serve", Some(format!("job {i}")));
            run.created_at = Utc::now() + chrono::Duration::seconds(i);
            registry.create(&run).await.unwrap();
        }
        let listed = registry.list(3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].summary.as_deref(), Some("job 4"));

        let all = registry.list(10_000).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn cancel_request_flags_row() {
        let db = Database::open_in_memory().await.unwrap();
        let registry = db.runs();
        let run = Run::queued("addon_run", None);
        registry.create(&run).await.unwrap();

        let flagged = registry.request_cancel(&run.id).await.unwrap().unwrap();
        assert!(flagged.cancel_requested);
        assert!(registry.request_cancel("run-missing").await.unwrap().is_none());
    }
}
