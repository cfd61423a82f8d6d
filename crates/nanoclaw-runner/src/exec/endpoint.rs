use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{warn, Level};

use nanoclaw_observability::OpsEvent;
use nanoclaw_types::{ActionResult, ExecutionMode, Run, RunStatus, RunUpdate};

use crate::{truncate_tail, RunnerState, FETCH_BODY_CAP};

/// Long-running work forwarded to an HTTP task endpoint. `opencode_serve`
/// and the addon actions share this path, so foreground/background
/// semantics and cancellation behave uniformly.
struct EndpointTask {
    action_type: &'static str,
    url: String,
    body: Value,
    summary: String,
    timeout: Duration,
}

pub(crate) async fn opencode(
    state: Arc<RunnerState>,
    task: &str,
    cwd: Option<&str>,
    timeout_secs: Option<u64>,
    mode: ExecutionMode,
    action_id: String,
) -> ActionResult {
    let Some(url) = state.config.tasks.opencode_url.clone() else {
        return ActionResult::failed(action_id, "opencode endpoint not configured".to_string(), 0);
    };
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.tasks.default_timeout);
    let body = json!({
        "task": task,
        "cwd": cwd,
        "executionMode": match mode {
            ExecutionMode::Foreground => "foreground",
            ExecutionMode::Background => "background",
        },
    });
    let endpoint_task = EndpointTask {
        action_type: "opencode_serve",
        url,
        body,
        summary: task.to_string(),
        timeout,
    };
    run_task(state, endpoint_task, mode, action_id).await
}

pub(crate) async fn addon(
    state: Arc<RunnerState>,
    operation: &'static str,
    name: &str,
    purpose: Option<&str>,
    input: Option<&str>,
    mode: ExecutionMode,
    action_id: String,
) -> ActionResult {
    let Some(url) = state.config.tasks.addons_url.clone() else {
        return ActionResult::failed(action_id, "addons endpoint not configured".to_string(), 0);
    };
    let mut body = json!({ "action": operation, "name": name });
    if let Some(purpose) = purpose {
        body["purpose"] = json!(purpose);
    }
    if let Some(input) = input {
        body["input"] = json!(input);
    }
    let action_type: &'static str = match operation {
        "install" => "addon_install",
        "create" => "addon_create",
        _ => "addon_run",
    };
    let endpoint_task = EndpointTask {
        action_type,
        url,
        body,
        summary: format!("{operation} {name}"),
        timeout: state.config.tasks.default_timeout,
    };
    run_task(state, endpoint_task, mode, action_id).await
}

async fn run_task(
    state: Arc<RunnerState>,
    task: EndpointTask,
    mode: ExecutionMode,
    action_id: String,
) -> ActionResult {
    match mode {
        ExecutionMode::Foreground => foreground(&state, task, action_id).await,
        ExecutionMode::Background => background(state, task, action_id).await,
    }
}

async fn foreground(state: &RunnerState, task: EndpointTask, action_id: String) -> ActionResult {
    let started = Instant::now();
    let resp = state
        .client
        .post(&task.url)
        .timeout(task.timeout)
        .json(&task.body)
        .send()
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match resp {
        Ok(resp) if resp.status().is_success() => {
            let text = resp.text().await.unwrap_or_default();
            ActionResult::ok(action_id, truncate_tail(&text, FETCH_BODY_CAP), duration_ms)
        }
        Ok(resp) => ActionResult::failed(
            action_id,
            format!("task endpoint answered {}", resp.status()),
            duration_ms,
        ),
        Err(e) => ActionResult::failed(
            action_id,
            format!("task endpoint request failed: {e}"),
            duration_ms,
        ),
    }
}

/// Create the run row, hand back a synthetic result immediately, and let a
/// worker drive the lifecycle. A cancel request aborts the in-flight
/// upstream call and the row lands on `cancelled`; partial output is
/// discarded.
async fn background(state: Arc<RunnerState>, task: EndpointTask, action_id: String) -> ActionResult {
    let run = Run::queued(task.action_type, Some(task.summary.clone()));
    if let Err(e) = state.runs.create(&run).await {
        return ActionResult::failed(action_id, format!("creating run failed: {e}"), 0);
    }
    let run_id = run.id.clone();
    let token = state.aborts.register(&run_id);

    let worker_state = state.clone();
    let worker_run_id = run_id.clone();
    tokio::spawn(async move {
        let runs = worker_state.runs.clone();

        // A cancel that landed while the run was still queued wins outright.
        match runs.get(&worker_run_id).await {
            Ok(Some(row)) if row.cancel_requested || row.status.is_terminal() => {
                let _ = runs
                    .update(
                        &worker_run_id,
                        RunUpdate {
                            status: Some(RunStatus::Cancelled),
                            completed_at: Some(Utc::now()),
                            ..RunUpdate::default()
                        },
                    )
                    .await;
                worker_state.aborts.remove(&worker_run_id);
                return;
            }
            _ => {}
        }

        let _ = runs
            .update(
                &worker_run_id,
                RunUpdate {
                    status: Some(RunStatus::Running),
                    started_at: Some(Utc::now()),
                    ..RunUpdate::default()
                },
            )
            .await;
        OpsEvent {
            component: "runner",
            run_id: Some(&worker_run_id),
            action_type: Some(task.action_type),
            status: Some(RunStatus::Running.as_str()),
            ..OpsEvent::default()
        }
        .emit(Level::INFO, "background run started");

        let request = worker_state
            .client
            .post(&task.url)
            .timeout(task.timeout)
            .json(&task.body)
            .send();

        let update = tokio::select! {
            _ = token.cancelled() => {
                RunUpdate {
                    status: Some(RunStatus::Cancelled),
                    completed_at: Some(Utc::now()),
                    ..RunUpdate::default()
                }
            }
            resp = request => match resp {
                Ok(resp) if resp.status().is_success() => {
                    let text = resp.text().await.unwrap_or_default();
                    RunUpdate {
                        status: Some(RunStatus::Completed),
                        completed_at: Some(Utc::now()),
                        result_text: Some(truncate_tail(&text, FETCH_BODY_CAP)),
                        ..RunUpdate::default()
                    }
                }
                Ok(resp) => RunUpdate {
                    status: Some(RunStatus::Failed),
                    completed_at: Some(Utc::now()),
                    error_text: Some(format!("task endpoint answered {}", resp.status())),
                    ..RunUpdate::default()
                },
                Err(e) => RunUpdate {
                    status: Some(RunStatus::Failed),
                    completed_at: Some(Utc::now()),
                    error_text: Some(format!("task endpoint request failed: {e}")),
                    ..RunUpdate::default()
                },
            }
        };

        let outcome = update.status.map(RunStatus::as_str).unwrap_or("unknown");
        if let Err(e) = runs.update(&worker_run_id, update).await {
            warn!(run_id = %worker_run_id, "run update failed: {e}");
        }
        OpsEvent {
            component: "runner",
            run_id: Some(&worker_run_id),
            action_type: Some(task.action_type),
            status: Some(outcome),
            ..OpsEvent::default()
        }
        .emit(Level::INFO, "background run finished");
        worker_state.aborts.remove(&worker_run_id);
    });

    ActionResult::ok(
        action_id,
        format!("background run started: runId={run_id}"),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RunnerConfig, RunnerState};
    use nanoclaw_registry::Database;
    use nanoclaw_types::ActionStatus;

    async fn state_with_opencode(url: &str) -> Arc<RunnerState> {
        let db = Database::open_in_memory().await.unwrap();
        let mut config = RunnerConfig::default();
        config.tasks.opencode_url = Some(url.to_string());
        config.tasks.default_timeout = Duration::from_secs(30);
        RunnerState::new(config, db.runs(), None).unwrap()
    }

    async fn wait_for_status(
        state: &RunnerState,
        run_id: &str,
        wanted: RunStatus,
    ) -> Option<Run> {
        for _ in 0..100 {
            if let Ok(Some(run)) = state.runs.get(run_id).await {
                if run.status == wanted {
                    return Some(run);
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    fn extract_run_id(result: &ActionResult) -> String {
        result
            .stdout
            .split("runId=")
            .nth(1)
            .expect("runId in synthetic result")
            .trim()
            .to_string()
    }

    #[tokio::test]
    async fn unconfigured_endpoint_fails() {
        let db = Database::open_in_memory().await.unwrap();
        let state = RunnerState::new(RunnerConfig::default(), db.runs(), None).unwrap();
        let result = opencode(
            state,
            "refactor",
            None,
            None,
            ExecutionMode::Foreground,
            "a0".into(),
        )
        .await;
        assert_eq!(result.status, ActionStatus::Failed);
        assert!(result.stderr.contains("not configured"));
    }

    #[tokio::test]
    async fn background_run_reports_handle_then_fails_on_dead_endpoint() {
        let state = state_with_opencode("http://127.0.0.1:9/serve").await;
        let result = opencode(
            state.clone(),
            "refactor module X",
            None,
            Some(5),
            ExecutionMode::Background,
            "a0".into(),
        )
        .await;
        assert_eq!(result.status, ActionStatus::Ok);
        assert!(result.stdout.contains("runId=run-"));

        let run_id = extract_run_id(&result);
        let run = wait_for_status(&state, &run_id, RunStatus::Failed)
            .await
            .expect("run reaches failed");
        assert!(run.error_text.unwrap().contains("request failed"));
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_run() {
        // A listener that accepts connections but never answers keeps the
        // upstream call in flight until the abort handle fires.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    sockets.push(socket);
                }
            }
        });

        let state = state_with_opencode(&format!("http://{addr}/serve")).await;
        let result = opencode(
            state.clone(),
            "long job",
            None,
            Some(120),
            ExecutionMode::Background,
            "a0".into(),
        )
        .await;
        let run_id = extract_run_id(&result);

        wait_for_status(&state, &run_id, RunStatus::Running)
            .await
            .expect("run starts");

        assert!(state.aborts.cancel(&run_id));
        let run = wait_for_status(&state, &run_id, RunStatus::Cancelled)
            .await
            .expect("run cancelled");
        assert!(run.result_text.is_none());
    }

    #[tokio::test]
    async fn addon_action_types_map_to_run_rows() {
        let state = {
            let db = Database::open_in_memory().await.unwrap();
            let mut config = RunnerConfig::default();
            config.tasks.addons_url = Some("http://127.0.0.1:9/addons".to_string());
            RunnerState::new(config, db.runs(), None).unwrap()
        };
        let result = addon(
            state.clone(),
            "run",
            "disk-report",
            None,
            Some("weekly"),
            ExecutionMode::Background,
            "a0".into(),
        )
        .await;
        let run_id = extract_run_id(&result);
        let run = state.runs.get(&run_id).await.unwrap().unwrap();
        assert_eq!(run.action_type, "addon_run");
        assert_eq!(run.summary.as_deref(), Some("run disk-report"));
    }
}
