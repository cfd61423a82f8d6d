use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use nanoclaw_dispatch::DispatcherConfig;
use nanoclaw_planner::PlannerConfig;
use nanoclaw_runner::RunnerConfig;

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(name: &str, default: bool) -> bool {
    match env(name) {
        Some(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        None => default,
    }
}

/// Everything the engine reads from the environment, assembled into the
/// per-crate config structs.
#[derive(Clone)]
pub struct EngineConfig {
    pub assistant_name: String,
    pub data_dir: PathBuf,
    pub notes_dir: Option<PathBuf>,
    pub timezone: Tz,
    pub bot_egress_url: Option<String>,
    /// Present only when a planner base url is configured; the runner
    /// process runs without one.
    pub planner: Option<PlannerConfig>,
    pub dispatcher: DispatcherConfig,
    pub runner: RunnerConfig,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = PathBuf::from(env("NANOCLAW_DATA_DIR").unwrap_or_else(|| "data".into()));
        let timezone: Tz = env("NANOCLAW_SCHEDULER_TZ")
            .unwrap_or_else(|| "UTC".into())
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid NANOCLAW_SCHEDULER_TZ: {e}"))?;

        let planner = match env("NANOCLAW_PLANNER_BASE_URL") {
            Some(base_url) => {
                let planner = PlannerConfig {
                    base_url,
                    api_key: env("NANOCLAW_PLANNER_API_KEY").unwrap_or_default(),
                    completion_model: env("NANOCLAW_COMPLETION_MODEL")
                        .unwrap_or_else(|| "qwen/qwen3-30b-a3b:free".into()),
                    reasoning_model: env("NANOCLAW_REASONING_MODEL")
                        .unwrap_or_else(|| "deepseek/deepseek-r1:free".into()),
                    require_free_models: env_flag("NANOCLAW_REQUIRE_FREE_MODELS", true),
                    timeout: Duration::from_secs(120),
                };
                planner.validate()?;
                Some(planner)
            }
            None => None,
        };

        let dispatcher = DispatcherConfig {
            runner_url: env("NANOCLAW_WEBHOOK_URL").unwrap_or_default(),
            secret: env("NANOCLAW_WEBHOOK_SECRET").unwrap_or_default(),
            timeout: Duration::from_millis(
                env("NANOCLAW_WEBHOOK_TIMEOUT_MS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10_000),
            ),
            source: "core".to_string(),
            enable_approved_execution: env_flag("NANOCLAW_ENABLE_APPROVED_EXECUTION", true),
            enable_local_approved_execution: false,
        };

        let mut runner = RunnerConfig {
            dispatch_secret: env("NANOCLAW_WEBHOOK_SECRET").unwrap_or_default(),
            runner_secret: env("NANOCLAW_RUNNER_SECRET").unwrap_or_default(),
            max_parallel: env("NANOCLAW_MAX_PARALLEL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(nanoclaw_runner::DEFAULT_MAX_PARALLEL),
            vault_root: env("NANOCLAW_VAULT_ROOT").map(PathBuf::from),
            ..RunnerConfig::default()
        };
        runner.ssh.hosts = ssh_hosts_from_env();
        runner.ssh.user = env("NANOCLAW_SSH_USER");
        runner.fetch.readable_mirror_url = env("NANOCLAW_READABLE_MIRROR_URL");
        runner.media.image_url = env("NANOCLAW_MEDIA_IMAGE_URL");
        runner.media.voice_url = env("NANOCLAW_MEDIA_VOICE_URL");
        runner.media.bearer_token = env("NANOCLAW_MEDIA_TOKEN").unwrap_or_default();
        runner.tasks.opencode_url = env("NANOCLAW_OPENCODE_URL");
        runner.tasks.addons_url = env("NANOCLAW_ADDONS_URL");

        Ok(Self {
            assistant_name: env("NANOCLAW_ASSISTANT_NAME").unwrap_or_else(|| "nanoclaw".into()),
            data_dir,
            notes_dir: env("NANOCLAW_NOTES_DIR").map(PathBuf::from),
            timezone,
            bot_egress_url: env("NANOCLAW_BOT_EGRESS_URL"),
            planner,
            dispatcher,
            runner,
        })
    }
}

/// The closed ssh host map; only targets with configured addresses are
/// reachable.
fn ssh_hosts_from_env() -> HashMap<String, String> {
    let mut hosts = HashMap::new();
    if let Some(addr) = env("NANOCLAW_SSH_HOST_WILLIAM") {
        hosts.insert("william".to_string(), addr);
    }
    if let Some(addr) = env("NANOCLAW_SSH_HOST_WILLY_UBUNTU") {
        hosts.insert("willy-ubuntu".to_string(), addr);
    }
    hosts
}
