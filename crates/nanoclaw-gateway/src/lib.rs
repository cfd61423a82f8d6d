//! Approval gateway: the human decision surface for proposed actions.
//!
//! Two equivalent ingress channels — text commands (`/approvals`,
//! `/approve <id>`, `/deny <id> [reason]`) and inline-button callbacks
//! (`approve:<id>`, `deny:<id>`, `reason:<id>`). Decisions are linearized
//! by the proposal store; the gateway hands approved actions to the
//! dispatcher and renders the results, but never executes anything itself.

mod present;
mod transport;

pub use present::render_results;
pub use transport::{split_message, ChatTransport, DEFAULT_MAX_MESSAGE_LEN};

use std::sync::Arc;

use tracing::Level;

use nanoclaw_dispatch::Dispatcher;
use nanoclaw_observability::OpsEvent;
use nanoclaw_planner::Planner;
use nanoclaw_store::{Decision, ProposalStore};
use nanoclaw_types::{Action, Proposal, ProposalStatus};

/// Pending proposals shown per `/approvals` call.
const APPROVALS_PAGE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalCommand {
    ListApprovals,
    Approve { id: String },
    Deny { id: String, reason: Option<String> },
}

/// Parse one of the approval text commands; `None` for anything else.
pub fn parse_approval_command(text: &str) -> Option<ApprovalCommand> {
    let trimmed = text.trim();
    if trimmed == "/approvals" {
        return Some(ApprovalCommand::ListApprovals);
    }
    if let Some(rest) = trimmed.strip_prefix("/approve ") {
        let id = rest.trim();
        if !id.is_empty() {
            return Some(ApprovalCommand::Approve { id: id.to_string() });
        }
    }
    if let Some(rest) = trimmed.strip_prefix("/deny ") {
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }
        let (id, reason) = match rest.split_once(' ') {
            Some((id, reason)) => (id, Some(reason.trim().to_string())),
            None => (rest, None),
        };
        return Some(ApprovalCommand::Deny {
            id: id.to_string(),
            reason: reason.filter(|r| !r.is_empty()),
        });
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Approve(String),
    Deny(String),
    Reason(String),
}

/// Parse an inline-button callback payload.
pub fn parse_callback(payload: &str) -> Option<CallbackAction> {
    if let Some(id) = payload.strip_prefix("approve:") {
        return Some(CallbackAction::Approve(id.to_string()));
    }
    if let Some(id) = payload.strip_prefix("deny:") {
        return Some(CallbackAction::Deny(id.to_string()));
    }
    payload
        .strip_prefix("reason:")
        .map(|id| CallbackAction::Reason(id.to_string()))
}

pub struct ApprovalGateway {
    proposals: Arc<ProposalStore>,
    dispatcher: Arc<Dispatcher>,
    planner: Arc<dyn Planner>,
    transport: Arc<dyn ChatTransport>,
}

impl ApprovalGateway {
    pub fn new(
        proposals: Arc<ProposalStore>,
        dispatcher: Arc<Dispatcher>,
        planner: Arc<dyn Planner>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            proposals,
            dispatcher,
            planner,
            transport,
        }
    }

    /// Handle a text command in `chat_id`. Returns whether the message was
    /// an approval command (and therefore fully handled here).
    pub async fn handle_command(&self, chat_id: &str, text: &str) -> anyhow::Result<bool> {
        let Some(command) = parse_approval_command(text) else {
            return Ok(false);
        };
        match command {
            ApprovalCommand::ListApprovals => self.list_approvals(chat_id).await?,
            ApprovalCommand::Approve { id } => self.approve(chat_id, &id).await?,
            ApprovalCommand::Deny { id, reason } => self.deny(chat_id, &id, reason).await?,
        }
        Ok(true)
    }

    /// Handle an inline-button callback. Returns whether the payload was an
    /// approval callback.
    pub async fn handle_callback(&self, chat_id: &str, payload: &str) -> anyhow::Result<bool> {
        let Some(callback) = parse_callback(payload) else {
            return Ok(false);
        };
        match callback {
            CallbackAction::Approve(id) => self.approve(chat_id, &id).await?,
            CallbackAction::Deny(id) => self.deny(chat_id, &id, None).await?,
            CallbackAction::Reason(id) => {
                self.send_chunked(
                    chat_id,
                    &format!("To deny with a reason, send: /deny {id} <reason>"),
                )
                .await?;
            }
        }
        Ok(true)
    }

    async fn list_approvals(&self, chat_id: &str) -> anyhow::Result<()> {
        let pending = self.proposals.list_pending_by_chat(chat_id).await;
        if pending.is_empty() {
            return self.send_chunked(chat_id, "No pending approvals.").await;
        }
        let lines: Vec<String> = pending
            .iter()
            .take(APPROVALS_PAGE)
            .map(|p| {
                let actions = p
                    .actions
                    .iter()
                    .map(Action::summary)
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("• `{}` — {}", p.id, actions)
            })
            .collect();
        self.send_chunked(
            chat_id,
            &format!("Pending approvals:\n{}", lines.join("\n")),
        )
        .await
    }

    async fn approve(&self, chat_id: &str, id: &str) -> anyhow::Result<()> {
        let Some(proposal) = self.proposals.decide(id, Decision::Approve, None).await? else {
            return self.report_stale(chat_id, id).await;
        };
        OpsEvent {
            component: "gateway",
            chat_id: Some(chat_id),
            proposal_id: Some(id),
            status: Some("approved"),
            ..OpsEvent::default()
        }
        .emit(Level::INFO, "proposal approved, handing off to dispatcher");

        let executable: Vec<Action> = proposal
            .actions
            .iter()
            .filter(|a| a.is_executable())
            .cloned()
            .collect();
        if executable.is_empty() {
            return self
                .send_chunked(chat_id, &format!("✅ Approved `{id}` — nothing to execute."))
                .await;
        }

        let results = self.dispatcher.dispatch(&executable).await;
        let rendered = render_results(self.planner.as_ref(), &executable, &results).await;
        self.send_chunked(chat_id, &format!("✅ Approved `{id}`.\n\n{rendered}"))
            .await
    }

    async fn deny(&self, chat_id: &str, id: &str, reason: Option<String>) -> anyhow::Result<()> {
        let Some(_) = self
            .proposals
            .decide(id, Decision::Deny, reason.clone())
            .await?
        else {
            return self.report_stale(chat_id, id).await;
        };
        OpsEvent {
            component: "gateway",
            chat_id: Some(chat_id),
            proposal_id: Some(id),
            status: Some("denied"),
            detail: reason.as_deref(),
            ..OpsEvent::default()
        }
        .emit(Level::INFO, "proposal denied");
        let ack = match reason {
            Some(reason) => format!("🚫 Denied `{id}` ({reason})."),
            None => format!("🚫 Denied `{id}`."),
        };
        self.send_chunked(chat_id, &ack).await
    }

    /// The decision lost the race or referenced an unknown id; tell the
    /// user what actually holds.
    async fn report_stale(&self, chat_id: &str, id: &str) -> anyhow::Result<()> {
        let message = match self.proposals.get_by_id(id).await {
            Some(Proposal {
                status: ProposalStatus::Approved,
                ..
            }) => format!("Proposal `{id}` is already approved."),
            Some(Proposal {
                status: ProposalStatus::Denied,
                ..
            }) => format!("Proposal `{id}` is already denied."),
            Some(_) => format!("Proposal `{id}` is still pending."),
            None => format!("No proposal `{id}` found."),
        };
        self.send_chunked(chat_id, &message).await
    }

    /// Announce a freshly enqueued proposal with its approval buttons.
    pub async fn announce_proposal(&self, proposal: &Proposal) -> anyhow::Result<()> {
        let actions = proposal
            .actions
            .iter()
            .map(|a| format!("• {}", a.summary()))
            .collect::<Vec<_>>()
            .join("\n");
        let text = format!(
            "Proposed actions (`{}`):\n{actions}\n\nApprove with /approve {} or deny with /deny {}",
            proposal.id, proposal.id, proposal.id
        );
        self.transport
            .send_approval_prompt(&proposal.chat_id, &text, &proposal.id)
            .await
    }

    async fn send_chunked(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        for chunk in split_message(text, self.transport.max_message_len()) {
            self.transport.send_text(chat_id, &chunk).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nanoclaw_dispatch::DispatcherConfig;
    use nanoclaw_planner::{PlannerReply, PlannerRequest};
    use nanoclaw_types::{ActionResult, SshTarget};
    use parking_lot::Mutex;

    // ── Command parsing ───────────────────────────────────────────────────

    #[test]
    fn parse_approvals() {
        assert_eq!(
            parse_approval_command("/approvals"),
            Some(ApprovalCommand::ListApprovals)
        );
    }

    #[test]
    fn parse_approve_with_id() {
        assert_eq!(
            parse_approval_command("/approve prop-1"),
            Some(ApprovalCommand::Approve {
                id: "prop-1".to_string()
            })
        );
        assert_eq!(parse_approval_command("/approve "), None);
    }

    #[test]
    fn parse_deny_with_and_without_reason() {
        assert_eq!(
            parse_approval_command("/deny prop-1"),
            Some(ApprovalCommand::Deny {
                id: "prop-1".to_string(),
                reason: None
            })
        );
        assert_eq!(
            parse_approval_command("/deny prop-1 too risky right now"),
            Some(ApprovalCommand::Deny {
                id: "prop-1".to_string(),
                reason: Some("too risky right now".to_string())
            })
        );
    }

    #[test]
    fn parse_non_commands() {
        assert_eq!(parse_approval_command("hello"), None);
        assert_eq!(parse_approval_command("/approvalsss"), None);
    }

    #[test]
    fn parse_callbacks() {
        assert_eq!(
            parse_callback("approve:prop-9"),
            Some(CallbackAction::Approve("prop-9".to_string()))
        );
        assert_eq!(
            parse_callback("deny:prop-9"),
            Some(CallbackAction::Deny("prop-9".to_string()))
        );
        assert_eq!(
            parse_callback("reason:prop-9"),
            Some(CallbackAction::Reason("prop-9".to_string()))
        );
        assert_eq!(parse_callback("other:prop-9"), None);
    }

    // ── Gateway behaviour ─────────────────────────────────────────────────

    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn texts(&self) -> Vec<String> {
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
            _proposal_id: &str,
        ) -> anyhow::Result<()> {
            self.send_text(chat_id, text).await
        }
    }

    struct FixedPlanner;

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan_turn(&self, _request: PlannerRequest) -> anyhow::Result<PlannerReply> {
            Ok(PlannerReply {
                text: "summary".to_string(),
                session_id: None,
            })
        }
    }

    fn ssh_action() -> Action {
        Action::Ssh {
            target: SshTarget::William,
            command: "uptime".to_string(),
            reason: "check load".to_string(),
            requires_approval: true,
            execution_mode: None,
            parallel_group: None,
        }
    }

    async fn gateway(
        dir: &std::path::Path,
    ) -> (ApprovalGateway, Arc<ProposalStore>, Arc<RecordingTransport>) {
        let proposals = Arc::new(ProposalStore::load(dir).await.unwrap());
        let config = DispatcherConfig {
            enable_local_approved_execution: true,
            ..DispatcherConfig::default()
        };
        let dispatcher = Arc::new(
            Dispatcher::new(config)
                .unwrap()
                .with_local_executor(Arc::new(|action: &Action| {
                    ActionResult::ok("local", format!("executed {}", action.kind()), 5)
                })),
        );
        let transport = RecordingTransport::new();
        let gateway = ApprovalGateway::new(
            proposals.clone(),
            dispatcher,
            Arc::new(FixedPlanner),
            transport.clone(),
        );
        (gateway, proposals, transport)
    }

    #[tokio::test]
    async fn approve_path_dispatches_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, proposals, transport) = gateway(dir.path()).await;
        let proposal = proposals
            .enqueue(Proposal::new(
                "main",
                "chat-1",
                Some("uptime on william".into()),
                vec![ssh_action()],
            ))
            .await
            .unwrap();

        let handled = gateway
            .handle_command("chat-1", &format!("/approve {}", proposal.id))
            .await
            .unwrap();
        assert!(handled);

        let texts = transport.texts();
        assert!(texts[0].contains("Approved"));
        assert!(texts[0].contains("executed ssh"));

        // A second approval observes the stale status.
        gateway
            .handle_command("chat-1", &format!("/approve {}", proposal.id))
            .await
            .unwrap();
        assert!(transport
            .texts()
            .last()
            .unwrap()
            .contains("already approved"));
    }

    #[tokio::test]
    async fn deny_acknowledges_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, proposals, transport) = gateway(dir.path()).await;
        let proposal = proposals
            .enqueue(Proposal::new("main", "chat-1", None, vec![ssh_action()]))
            .await
            .unwrap();

        gateway
            .handle_command("chat-1", &format!("/deny {} not today", proposal.id))
            .await
            .unwrap();
        let texts = transport.texts();
        assert!(texts[0].contains("Denied"));
        assert!(texts[0].contains("not today"));

        // Deny after deny reports the stale state.
        gateway
            .handle_callback("chat-1", &format!("deny:{}", proposal.id))
            .await
            .unwrap();
        assert!(transport.texts().last().unwrap().contains("already denied"));
    }

    #[tokio::test]
    async fn approvals_lists_pending_for_the_chat() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, proposals, transport) = gateway(dir.path()).await;
        for _ in 0..2 {
            proposals
                .enqueue(Proposal::new("main", "chat-1", None, vec![ssh_action()]))
                .await
                .unwrap();
        }

        gateway.handle_command("chat-1", "/approvals").await.unwrap();
        let text = transport.texts().pop().unwrap();
        assert!(text.contains("Pending approvals"));
        assert_eq!(text.matches("prop-").count(), 2);

        gateway.handle_command("chat-2", "/approvals").await.unwrap();
        assert!(transport.texts().pop().unwrap().contains("No pending"));
    }

    #[tokio::test]
    async fn reason_callback_explains_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _proposals, transport) = gateway(dir.path()).await;
        let handled = gateway
            .handle_callback("chat-1", "reason:prop-7")
            .await
            .unwrap();
        assert!(handled);
        assert!(transport.texts()[0].contains("/deny prop-7"));
    }

    #[tokio::test]
    async fn unknown_id_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _proposals, transport) = gateway(dir.path()).await;
        gateway
            .handle_command("chat-1", "/approve prop-missing")
            .await
            .unwrap();
        assert!(transport.texts()[0].contains("No proposal"));
    }

    #[tokio::test]
    async fn non_commands_are_not_handled() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _proposals, transport) = gateway(dir.path()).await;
        assert!(!gateway.handle_command("chat-1", "hello").await.unwrap());
        assert!(transport.texts().is_empty());
    }
}
