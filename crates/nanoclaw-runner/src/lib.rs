//! The runner: accepts signed dispatches over HTTP and executes each
//! approved action — remote read-only shell, outbound fetches, media
//! transcription endpoints, vault writes and long-running code tasks in
//! foreground or background mode.

mod exec;
mod http;

pub use exec::browser::{BrowserFetcher, BrowserPage};
pub use http::{app_router, serve};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Semaphore;

use nanoclaw_registry::{AbortRegistry, RunRegistry};

pub const DEFAULT_MAX_PARALLEL: usize = 4;
pub const DEFAULT_SSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Bytes of captured output kept per action; everything past the cap is
/// dropped from the tail.
pub const STDOUT_CAP: usize = 100_000;
pub const STDERR_CAP: usize = 10_000;
pub const FETCH_BODY_CAP: usize = 12_000;

#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Closed map of ssh target name to reachable address.
    pub hosts: HashMap<String, String>,
    pub user: Option<String>,
    /// Client binary to invoke; overridable so tests can stub the remote.
    pub program: String,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub strict_host_key_checking: String,
    pub command_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            hosts: HashMap::new(),
            user: None,
            program: "ssh".to_string(),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(15),
            strict_host_key_checking: "accept-new".to_string(),
            command_timeout: DEFAULT_SSH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Prefix prepended to the target url when the browser driver is
    /// unavailable, e.g. a readability proxy.
    pub readable_mirror_url: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: "nanoclaw-runner/0.2".to_string(),
            readable_mirror_url: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaConfig {
    pub image_url: Option<String>,
    pub voice_url: Option<String>,
    pub bearer_token: String,
}

#[derive(Debug, Clone)]
pub struct TaskEndpointConfig {
    pub opencode_url: Option<String>,
    pub addons_url: Option<String>,
    pub default_timeout: Duration,
}

impl Default for TaskEndpointConfig {
    fn default() -> Self {
        Self {
            opencode_url: None,
            addons_url: None,
            default_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// HMAC secret for `/dispatch`; empty accepts unsigned dispatches.
    pub dispatch_secret: String,
    /// Shared secret for the run management API.
    pub runner_secret: String,
    pub max_parallel: usize,
    pub ssh: SshConfig,
    pub fetch: FetchConfig,
    pub media: MediaConfig,
    pub tasks: TaskEndpointConfig,
    /// Root of the notes vault `obsidian_write` may touch.
    pub vault_root: Option<PathBuf>,
}

/// Shared state behind the axum router.
pub struct RunnerState {
    pub config: RunnerConfig,
    pub client: Client,
    pub runs: RunRegistry,
    pub aborts: AbortRegistry,
    pub browser: Option<Arc<dyn BrowserFetcher>>,
    parallel_slots: Arc<Semaphore>,
}

impl RunnerState {
    pub fn new(
        config: RunnerConfig,
        runs: RunRegistry,
        browser: Option<Arc<dyn BrowserFetcher>>,
    ) -> anyhow::Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(config.fetch.timeout)
            .user_agent(config.fetch.user_agent.clone())
            .build()?;
        let max_parallel = if config.max_parallel == 0 {
            DEFAULT_MAX_PARALLEL
        } else {
            config.max_parallel
        };
        Ok(Arc::new(Self {
            config,
            client,
            runs,
            aborts: AbortRegistry::new(),
            browser,
            parallel_slots: Arc::new(Semaphore::new(max_parallel)),
        }))
    }

    pub(crate) fn parallel_slots(&self) -> Arc<Semaphore> {
        self.parallel_slots.clone()
    }
}

/// Keep the head of `text` up to `cap` bytes (on a char boundary), marking
/// the cut.
pub(crate) fn truncate_tail(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut cut = cap;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... [truncated]", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_head() {
        let text = "a".repeat(50);
        assert_eq!(truncate_tail(&text, 100), text);
        let long = format!("{}{}", "b".repeat(10), "c".repeat(100));
        let cut = truncate_tail(&long, 10);
        assert!(cut.starts_with("bbbbbbbbbb"));
        assert!(cut.ends_with("[truncated]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "é".repeat(100);
        let cut = truncate_tail(&text, 25);
        assert!(cut.ends_with("[truncated]"));
    }
}
