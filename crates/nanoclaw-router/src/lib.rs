//! The cooperative loops that drive the orchestrator: inbound message
//! ingestion (at-least-once, watermarked), the on-disk IPC watcher, and the
//! periodic task scheduler. Each loop owns its mutable state and runs
//! independently; they share only the stores.

mod ipc;
mod message_loop;
mod schedule;
mod scheduler;

pub use ipc::{ipc_tick, run_ipc_watcher, write_ipc_file};
pub use message_loop::{message_loop_tick, run_agent_turn, run_message_loop};
pub use schedule::{next_run, validate_schedule};
pub use scheduler::{run_scheduler, scheduler_tick};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use regex::Regex;
use tokio::task::JoinSet;

use nanoclaw_gateway::{ApprovalGateway, ChatTransport};
use nanoclaw_planner::{MemorySource, Planner};
use nanoclaw_registry::{MessageStore, TaskStore};
use nanoclaw_store::{GroupRegistry, ProposalStore, RouterState, SessionStore};

/// Everything the loops touch, shared behind one `Arc`.
pub struct RouterContext {
    pub groups: Arc<GroupRegistry>,
    pub state: Arc<RouterState>,
    pub sessions: Arc<SessionStore>,
    pub proposals: Arc<ProposalStore>,
    pub messages: Arc<dyn MessageStore>,
    pub tasks: TaskStore,
    pub planner: Arc<dyn Planner>,
    pub memory: Arc<dyn MemorySource>,
    pub gateway: Arc<ApprovalGateway>,
    pub transport: Arc<dyn ChatTransport>,
    /// Assistant name; `@<name>` is the trigger prefix in non-main groups.
    pub assistant_name: String,
    pub data_dir: PathBuf,
    /// Zone cron schedules are evaluated in.
    pub timezone: Tz,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub poll_interval: Duration,
    pub ipc_interval: Duration,
    pub scheduler_period: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            ipc_interval: Duration::from_secs(1),
            scheduler_period: Duration::from_secs(60),
        }
    }
}

/// Start the three loops. The caller aborts the set on shutdown.
pub fn spawn_loops(ctx: Arc<RouterContext>, config: RouterConfig) -> JoinSet<()> {
    let mut set = JoinSet::new();
    set.spawn(run_message_loop(ctx.clone(), config.poll_interval));
    set.spawn(run_ipc_watcher(ctx.clone(), config.ipc_interval));
    set.spawn(run_scheduler(ctx, config.scheduler_period));
    set
}

pub(crate) fn trigger_regex(name: &str) -> Regex {
    Regex::new(&format!(r"(?i)^@{}\b", regex::escape(name))).expect("trigger pattern")
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    use std::collections::VecDeque;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    use nanoclaw_dispatch::{Dispatcher, DispatcherConfig};
    use nanoclaw_planner::{NoopMemory, PlannerReply, PlannerRequest};
    use nanoclaw_registry::Database;
    use nanoclaw_store::MAIN_GROUP_FOLDER;
    use nanoclaw_types::{Action, ActionResult, RegisteredGroup};

    /// Planner double: pops scripted replies in order and records every
    /// request.
    pub struct ScriptedPlanner {
        replies: Mutex<VecDeque<anyhow::Result<String>>>,
        pub requests: Mutex<Vec<PlannerRequest>>,
    }

    impl ScriptedPlanner {
        pub fn new(replies: Vec<anyhow::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn plan_turn(&self, request: PlannerRequest) -> anyhow::Result<PlannerReply> {
            self.requests.lock().push(request);
            match self.replies.lock().pop_front() {
                Some(Ok(text)) => Ok(PlannerReply {
                    text,
                    session_id: Some("sess-test".to_string()),
                }),
                Some(Err(e)) => Err(e),
                None => Ok(PlannerReply {
                    text: "{}".to_string(),
                    session_id: Some("sess-test".to_string()),
                }),
            }
        }
    }

    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(String, String)>>,
        pub prompts: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .push((chat_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_approval_prompt(
            &self,
            chat_id: &str,
            text: &str,
            proposal_id: &str,
        ) -> anyhow::Result<()> {
            self.prompts
                .lock()
                .push((chat_id.to_string(), proposal_id.to_string()));
            self.send_text(chat_id, text).await
        }
    }

    pub struct Harness {
        pub ctx: Arc<RouterContext>,
        pub planner: Arc<ScriptedPlanner>,
        pub transport: Arc<RecordingTransport>,
        pub db: Database,
        _data_dir: tempfile::TempDir,
    }

    /// Full context over temp storage with `main` (chat-main) and `side`
    /// (chat-side) groups registered.
    pub async fn harness(replies: Vec<anyhow::Result<String>>) -> Harness {
        let data_dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let planner = ScriptedPlanner::new(replies);
        let transport = RecordingTransport::new();

        let groups = Arc::new(GroupRegistry::load(data_dir.path()).await.unwrap());
        groups
            .register(
                "chat-main",
                RegisteredGroup {
                    name: "ops".to_string(),
                    folder: MAIN_GROUP_FOLDER.to_string(),
                    trigger: "@claw".to_string(),
                    added_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        groups
            .register(
                "chat-side",
                RegisteredGroup {
                    name: "side".to_string(),
                    folder: "side".to_string(),
                    trigger: "@claw".to_string(),
                    added_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let proposals = Arc::new(ProposalStore::load(data_dir.path()).await.unwrap());
        let dispatcher = Arc::new(
            Dispatcher::new(DispatcherConfig {
                enable_local_approved_execution: true,
                ..DispatcherConfig::default()
            })
            .unwrap()
            .with_local_executor(Arc::new(|action: &Action| {
                ActionResult::ok("local", format!("executed {}", action.kind()), 2)
            })),
        );
        let gateway = Arc::new(ApprovalGateway::new(
            proposals.clone(),
            dispatcher,
            planner.clone(),
            transport.clone(),
        ));

        let ctx = Arc::new(RouterContext {
            groups,
            state: Arc::new(RouterState::load(data_dir.path()).await.unwrap()),
            sessions: Arc::new(SessionStore::load(data_dir.path()).await.unwrap()),
            proposals,
            messages: Arc::new(db.messages()),
            tasks: db.tasks(),
            planner: planner.clone(),
            memory: Arc::new(NoopMemory),
            gateway,
            transport: transport.clone(),
            assistant_name: "claw".to_string(),
            data_dir: data_dir.path().to_path_buf(),
            timezone: chrono_tz::UTC,
        });

        Harness {
            ctx,
            planner,
            transport,
            db,
            _data_dir: data_dir,
        }
    }
}
