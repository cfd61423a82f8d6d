//! Interfaces to the external planner and memory collaborators.
//!
//! The planner is reached over an agent-server HTTP API: one session per
//! group folder (so consecutive turns share context) and one synchronous
//! prompt call per turn. Memory retrieval is a header-producing trait; the
//! shipped implementation reads a per-group notes file without any indexing.

mod http;
mod memory;

pub use http::{HttpPlanner, PlannerConfig};
pub use memory::{MemorySource, NoopMemory, NotesDirMemory};

use async_trait::async_trait;

/// Reply posted to the user when the planner yields nothing usable.
pub const FALLBACK_REPLY: &str = "I could not generate a complete answer.";

#[derive(Debug, Clone)]
pub struct PlannerRequest {
    pub prompt: String,
    /// Session to continue; `None` starts a fresh one.
    pub session_id: Option<String>,
    /// Marks turns fired by the scheduler rather than a live user.
    pub scheduled: bool,
}

#[derive(Debug, Clone)]
pub struct PlannerReply {
    pub text: String,
    /// Session the turn ran in, for persistence by the caller.
    pub session_id: Option<String>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan_turn(&self, request: PlannerRequest) -> anyhow::Result<PlannerReply>;

    /// One-shot sessionless completion, used for result summarization.
    async fn summarize(&self, prompt: &str) -> anyhow::Result<String> {
        let reply = self
            .plan_turn(PlannerRequest {
                prompt: prompt.to_string(),
                session_id: None,
                scheduled: false,
            })
            .await?;
        Ok(reply.text)
    }
}
