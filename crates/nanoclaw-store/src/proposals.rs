use std::path::{Path, PathBuf};

use anyhow::bail;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use nanoclaw_types::{Proposal, ProposalStatus};

use crate::atomic::{read_json_or_default, write_json_atomic};

const JOURNAL_FILE: &str = "action-queue.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    fn status(self) -> ProposalStatus {
        match self {
            Decision::Approve => ProposalStatus::Approved,
            Decision::Deny => ProposalStatus::Denied,
        }
    }
}

/// Append-only journal of proposals, persisted as one JSON array. The
/// approval gateway is the only status mutator; `decide` is the single
/// one-time transition out of `proposed`.
pub struct ProposalStore {
    path: PathBuf,
    proposals: RwLock<Vec<Proposal>>,
}

impl ProposalStore {
    pub async fn load(data_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = data_dir.as_ref().join(JOURNAL_FILE);
        let proposals: Vec<Proposal> = read_json_or_default(&path).await;
        Ok(Self {
            path,
            proposals: RwLock::new(proposals),
        })
    }

    /// Persist a new proposal. Proposals with zero actions are rejected.
    pub async fn enqueue(&self, proposal: Proposal) -> anyhow::Result<Proposal> {
        if proposal.actions.is_empty() {
            bail!("proposal {} has no actions", proposal.id);
        }
        let mut guard = self.proposals.write().await;
        guard.push(proposal.clone());
        write_json_atomic(&self.path, &*guard).await?;
        info!(proposal_id = %proposal.id, chat_id = %proposal.chat_id, "proposal enqueued");
        Ok(proposal)
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Proposal> {
        self.proposals
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Pending proposals for one chat, oldest first.
    pub async fn list_pending_by_chat(&self, chat_id: &str) -> Vec<Proposal> {
        self.proposals
            .read()
            .await
            .iter()
            .filter(|p| p.chat_id == chat_id && p.is_pending())
            .cloned()
            .collect()
    }

    /// Flip a pending proposal to its terminal status. Returns `None` when
    /// the proposal is missing or already decided; in a decision race the
    /// first caller wins and the loser observes the stale status via
    /// `get_by_id`.
    pub async fn decide(
        &self,
        id: &str,
        decision: Decision,
        reason: Option<String>,
    ) -> anyhow::Result<Option<Proposal>> {
        let mut guard = self.proposals.write().await;
        let Some(proposal) = guard.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        if proposal.status != ProposalStatus::Proposed {
            return Ok(None);
        }
        proposal.status = decision.status();
        proposal.decided_at = Some(Utc::now());
        proposal.decision_reason = reason;
        let decided = proposal.clone();
        write_json_atomic(&self.path, &*guard).await?;
        info!(proposal_id = %id, status = ?decided.status, "proposal decided");
        Ok(Some(decided))
    }
}
