//! Logging for nanoclaw processes.
//!
//! Both binaries log to the console and to one daily JSONL file per process
//! under the data directory, with rotated files dropped past the retention
//! window. Orchestration milestones (a dispatch leaving the core, a run
//! changing state, a proposal being decided) are logged as [`OpsEvent`]s so
//! a `dispatch_id` or `run_id` can be traced across process boundaries.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Agent,
    Runner,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Agent => "agent",
            ProcessKind::Runner => "runner",
        }
    }

    fn file_stem(self) -> String {
        format!("nanoclaw-{}", self.as_str())
    }
}

/// Keeps the non-blocking file writer alive; hold it for the whole process.
pub struct LogGuard {
    _worker: WorkerGuard,
}

pub fn logs_dir_under(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Install the console layer and the daily-rotating JSONL appender for this
/// process, pruning rotated files older than `keep_days` first.
pub fn init_logging(
    process: ProcessKind,
    logs_dir: &Path,
    keep_days: u32,
) -> anyhow::Result<LogGuard> {
    fs::create_dir_all(logs_dir)?;
    prune_rotated_files(logs_dir, process, keep_days);

    let appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(process.file_stem())
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (file_writer, worker) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()
        .ok();

    Ok(LogGuard { _worker: worker })
}

/// Delete this process's rotated files whose date stamp fell out of the
/// retention window. Files of other processes (or with unparseable names)
/// stay put.
fn prune_rotated_files(logs_dir: &Path, process: ProcessKind, keep_days: u32) {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };
    let oldest_kept = Utc::now().date_naive() - chrono::Days::new(keep_days as u64);

    let expired: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| rotation_date(name, &process.file_stem()))
                .map(|date| date < oldest_kept)
                .unwrap_or(false)
        })
        .collect();
    for path in expired {
        let _ = fs::remove_file(path);
    }
}

/// Date stamp of a rotated file named `<stem>.<YYYY-MM-DD>.jsonl`.
fn rotation_date(file_name: &str, stem: &str) -> Option<NaiveDate> {
    let rest = file_name.strip_prefix(stem)?.strip_prefix('.')?;
    let stamp = rest.strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

/// One orchestration milestone, logged with the ids needed to follow a
/// piece of work from chat turn to runner and back. Unset ids log as empty
/// fields so the JSONL schema stays flat.
#[derive(Debug, Default)]
pub struct OpsEvent<'a> {
    pub component: &'a str,
    pub chat_id: Option<&'a str>,
    pub proposal_id: Option<&'a str>,
    pub dispatch_id: Option<&'a str>,
    pub run_id: Option<&'a str>,
    pub action_type: Option<&'a str>,
    pub status: Option<&'a str>,
    pub detail: Option<&'a str>,
}

impl OpsEvent<'_> {
    pub fn emit(&self, level: Level, message: &str) {
        macro_rules! log_at {
            ($macro:ident) => {
                tracing::$macro!(
                    target: "nanoclaw.ops",
                    component = self.component,
                    chat_id = self.chat_id.unwrap_or(""),
                    proposal_id = self.proposal_id.unwrap_or(""),
                    dispatch_id = self.dispatch_id.unwrap_or(""),
                    run_id = self.run_id.unwrap_or(""),
                    action_type = self.action_type.unwrap_or(""),
                    status = self.status.unwrap_or(""),
                    detail = self.detail.unwrap_or(""),
                    "{}",
                    message
                )
            };
        }
        match level {
            Level::ERROR => log_at!(error),
            Level::WARN => log_at!(warn),
            Level::DEBUG => log_at!(debug),
            Level::TRACE => log_at!(trace),
            _ => log_at!(info),
        }
    }
}

/// What startup logs show instead of a secret: whether it is set, its
/// length, and a short stable fingerprint for telling two values apart.
pub fn secret_fingerprint(value: &str) -> String {
    use std::hash::{Hash, Hasher};

    let value = value.trim();
    if value.is_empty() {
        return "(unset)".to_string();
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    format!("set(len={}, fp={:08x})", value.len(), hasher.finish() as u32)
}
