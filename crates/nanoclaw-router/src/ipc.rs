use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info, warn};

use nanoclaw_store::MAIN_GROUP_FOLDER;
use nanoclaw_types::{RegisteredGroup, ScheduleKind, ScheduledTask, TaskStatus};

use crate::schedule::{next_run, validate_schedule};
use crate::RouterContext;

/// On-disk request files dropped by agents and containers. The payloads use
/// the writers' wire names verbatim.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcFile {
    Message {
        #[serde(rename = "chatJid")]
        chat_jid: String,
        text: String,
    },
    ScheduleTask {
        prompt: String,
        schedule_type: String,
        schedule_value: String,
        #[serde(rename = "groupFolder")]
        group_folder: String,
        #[serde(rename = "chatJid", default)]
        chat_jid: Option<String>,
    },
    PauseTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    ResumeTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    CancelTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    RefreshGroups {},
    RegisterGroup {
        #[serde(rename = "chatJid")]
        chat_jid: String,
        name: String,
        folder: String,
        #[serde(default)]
        trigger: Option<String>,
    },
}

/// Second cooperative loop: drain the per-source-group IPC directories.
pub async fn run_ipc_watcher(ctx: Arc<RouterContext>, interval: Duration) {
    loop {
        if let Err(e) = ipc_tick(&ctx).await {
            warn!("ipc tick failed: {e:#}");
        }
        tokio::time::sleep(interval).await;
    }
}

/// One scan over `data/ipc/<sourceGroup>/{messages,tasks}/*.json`. The
/// directory name is the authenticated source identity; directories that do
/// not belong to a registered folder are ignored. Handled files rotate into
/// `completed/`, malformed ones into `errors/`, both tagged with the source.
pub async fn ipc_tick(ctx: &RouterContext) -> anyhow::Result<()> {
    let ipc_root = ctx.data_dir.join("ipc");
    if !ipc_root.is_dir() {
        return Ok(());
    }

    let mut registered = ctx.groups.folders().await;
    if !registered.contains(&MAIN_GROUP_FOLDER.to_string()) {
        registered.push(MAIN_GROUP_FOLDER.to_string());
    }

    for source in registered {
        for kind in ["messages", "tasks"] {
            let dir = ipc_root.join(&source).join(kind);
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };
            let mut files = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    files.push(path);
                }
            }
            // Filenames start with a millisecond stamp; name order is
            // arrival order.
            files.sort();

            for path in files {
                handle_file(ctx, &ipc_root, &source, &path).await;
            }
        }
    }
    Ok(())
}

async fn handle_file(ctx: &RouterContext, ipc_root: &Path, source: &str, path: &PathBuf) {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), "ipc file unreadable: {e}");
            return;
        }
    };

    match serde_json::from_str::<IpcFile>(&raw) {
        Ok(file) => {
            if let Err(e) = apply(ctx, source, file).await {
                warn!(source, path = %path.display(), "ipc request failed: {e:#}");
                rotate(ipc_root, source, path, "errors").await;
                return;
            }
            rotate(ipc_root, source, path, "completed").await;
        }
        Err(e) => {
            warn!(source, path = %path.display(), "malformed ipc file: {e}");
            rotate(ipc_root, source, path, "errors").await;
        }
    }
}

/// Move a processed file into `<ipc>/<bucket>/<source>-<name>.json`.
async fn rotate(ipc_root: &Path, source: &str, path: &Path, bucket: &str) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed.json");
    let target_dir = ipc_root.join(bucket);
    if let Err(e) = fs::create_dir_all(&target_dir).await {
        warn!("creating ipc {bucket} dir failed: {e}");
        return;
    }
    let target = target_dir.join(format!("{source}-{name}"));
    if let Err(e) = fs::rename(path, &target).await {
        warn!(path = %path.display(), "rotating ipc file failed: {e}");
    }
}

async fn apply(ctx: &RouterContext, source: &str, file: IpcFile) -> anyhow::Result<()> {
    let is_main = source == MAIN_GROUP_FOLDER;
    match file {
        IpcFile::Message { chat_jid, text } => {
            if !is_main && !ctx.groups.folder_owns_chat(source, &chat_jid).await {
                warn!(source, chat_jid, "unauthorized ipc message dropped");
                return Ok(());
            }
            for chunk in nanoclaw_gateway::split_message(&text, ctx.transport.max_message_len()) {
                ctx.transport.send_text(&chat_jid, &chunk).await?;
            }
            debug!(source, chat_jid, "ipc message delivered");
            Ok(())
        }
        IpcFile::ScheduleTask {
            prompt,
            schedule_type,
            schedule_value,
            group_folder,
            chat_jid,
        } => {
            if !is_main && group_folder != source {
                warn!(source, group_folder, "unauthorized ipc schedule dropped");
                return Ok(());
            }
            let kind = parse_schedule_kind(&schedule_type)?;
            validate_schedule(kind, &schedule_value)?;

            let chat_id = match chat_jid {
                Some(chat_jid) => chat_jid,
                None => {
                    let Some((chat_id, _)) = ctx.groups.by_folder(&group_folder).await else {
                        anyhow::bail!("no registered chat for folder `{group_folder}`");
                    };
                    chat_id
                }
            };
            let first_run = next_run(kind, &schedule_value, Utc::now(), ctx.timezone)?;
            let task = ScheduledTask::new(
                group_folder,
                chat_id,
                prompt,
                kind,
                schedule_value,
                first_run,
            );
            ctx.tasks.create(&task).await?;
            info!(task_id = %task.id, "ipc task scheduled");
            Ok(())
        }
        IpcFile::PauseTask { task_id } => {
            task_transition(ctx, source, &task_id, TaskStatus::Paused).await
        }
        IpcFile::ResumeTask { task_id } => {
            task_transition(ctx, source, &task_id, TaskStatus::Active).await
        }
        IpcFile::CancelTask { task_id } => {
            task_transition(ctx, source, &task_id, TaskStatus::Cancelled).await
        }
        IpcFile::RefreshGroups {} => {
            if !is_main {
                warn!(source, "unauthorized refresh_groups dropped");
                return Ok(());
            }
            ctx.groups.refresh().await
        }
        IpcFile::RegisterGroup {
            chat_jid,
            name,
            folder,
            trigger,
        } => {
            if !is_main {
                warn!(source, folder, "unauthorized register_group dropped");
                return Ok(());
            }
            let trigger = trigger.unwrap_or_else(|| format!("@{}", ctx.assistant_name));
            ctx.groups
                .register(
                    &chat_jid,
                    RegisteredGroup {
                        name,
                        folder,
                        trigger,
                        added_at: Utc::now(),
                    },
                )
                .await
        }
    }
}

async fn task_transition(
    ctx: &RouterContext,
    source: &str,
    task_id: &str,
    to: TaskStatus,
) -> anyhow::Result<()> {
    let Some(task) = ctx.tasks.get(task_id).await? else {
        anyhow::bail!("task `{task_id}` not found");
    };
    if source != MAIN_GROUP_FOLDER && task.group_folder != source {
        warn!(source, task_id, "unauthorized task transition dropped");
        return Ok(());
    }
    match ctx.tasks.transition(task_id, to).await? {
        Some(_) => Ok(()),
        None => {
            debug!(task_id, ?to, "task transition was not applicable");
            Ok(())
        }
    }
}

fn parse_schedule_kind(raw: &str) -> anyhow::Result<ScheduleKind> {
    match raw {
        "cron" => Ok(ScheduleKind::Cron),
        "interval" => Ok(ScheduleKind::Interval),
        "once" => Ok(ScheduleKind::Once),
        other => anyhow::bail!("unknown schedule_type `{other}`"),
    }
}

/// Writer-side convention: `name.json.tmp` then rename, with a
/// `<ms>-<6 base36>.json` filename.
pub async fn write_ipc_file(
    ipc_root: &Path,
    source: &str,
    kind: &str,
    payload: &serde_json::Value,
) -> anyhow::Result<PathBuf> {
    let dir = ipc_root.join(source).join(kind);
    fs::create_dir_all(&dir).await?;
    let name = format!(
        "{}-{}.json",
        Utc::now().timestamp_millis(),
        base36_suffix()
    );
    let path = dir.join(&name);
    let tmp = dir.join(format!("{name}.tmp"));
    fs::write(&tmp, serde_json::to_vec_pretty(payload)?).await?;
    fs::rename(&tmp, &path).await?;
    Ok(path)
}

fn base36_suffix() -> String {
    let mut value = uuid::Uuid::new_v4().as_u128();
    let digits: Vec<char> = "0123456789abcdefghijklmnopqrstuvwxyz".chars().collect();
    let mut out = String::with_capacity(6);
    for _ in 0..6 {
        out.push(digits[(value % 36) as usize]);
        value /= 36;
    }
    out
}
