//! Dispatcher: turns an approved action batch into a signed webhook POST and
//! interprets the runner's per-action results.
//!
//! The dispatcher has no side effects beyond the outbound request. Safety
//! filters run first; violating actions become `blocked` results locally and
//! the surviving subset is posted, with results re-zipped to the original
//! positions so callers can always line inputs up with outputs.

mod sign;

pub use sign::{sign, signature_header_value, verify};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::{warn, Level};
use uuid::Uuid;

use nanoclaw_observability::OpsEvent;
use nanoclaw_safety::action_policy_violation;
use nanoclaw_types::{
    Action, ActionResult, DispatchEnvelope, DispatchResponse, DISPATCH_EVENT, DISPATCH_ID_HEADER,
    SIGNATURE_HEADER, SIGNATURE_TS_HEADER,
};

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Test-only escape hatch invoked instead of the webhook when local
/// execution is explicitly enabled.
pub type LocalExecutor = Arc<dyn Fn(&Action) -> ActionResult + Send + Sync>;

#[derive(Clone)]
pub struct DispatcherConfig {
    pub runner_url: String,
    pub secret: String,
    pub timeout: Duration,
    /// `source` field stamped into every envelope.
    pub source: String,
    /// When false every executable action reports `skipped`.
    pub enable_approved_execution: bool,
    /// Escape hatch for tests; refused unless a local executor is wired in.
    pub enable_local_approved_execution: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            runner_url: String::new(),
            secret: String::new(),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
            source: "core".to_string(),
            enable_approved_execution: true,
            enable_local_approved_execution: false,
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    client: Client,
    local_executor: Option<LocalExecutor>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            local_executor: None,
        })
    }

    /// Wire in the test-only local executor; only effective together with
    /// `enable_local_approved_execution`.
    pub fn with_local_executor(mut self, executor: LocalExecutor) -> Self {
        self.local_executor = Some(executor);
        self
    }

    /// Envelope plus its serialized body, exposed so the signature can be
    /// verified against exactly what goes on the wire.
    pub fn build_envelope(&self, actions: Vec<Action>) -> anyhow::Result<(DispatchEnvelope, String)> {
        let envelope = DispatchEnvelope {
            event: DISPATCH_EVENT.to_string(),
            dispatch_id: Uuid::new_v4().to_string(),
            dispatched_at: Utc::now(),
            source: self.config.source.clone(),
            actions,
        };
        let body = serde_json::to_string(&envelope)?;
        Ok((envelope, body))
    }

    /// Execute an approved batch. The returned vector is index-aligned with
    /// `actions`; every action gets exactly one result.
    pub async fn dispatch(&self, actions: &[Action]) -> Vec<ActionResult> {
        let action_id = |index: usize| format!("a{index}");

        if !self.config.enable_approved_execution {
            return (0..actions.len())
                .map(|i| ActionResult::skipped(action_id(i), "approved-action execution is disabled"))
                .collect();
        }

        // Safety filters first: violations never leave the process.
        let mut slots: Vec<Option<ActionResult>> = Vec::with_capacity(actions.len());
        let mut outbound: Vec<(usize, Action)> = Vec::new();
        for (index, action) in actions.iter().enumerate() {
            match action_policy_violation(action) {
                Some(cause) => {
                    warn!(index, kind = action.kind(), %cause, "action blocked by safety policy");
                    slots.push(Some(ActionResult::blocked(action_id(index), cause)));
                }
                None => {
                    slots.push(None);
                    outbound.push((index, action.clone()));
                }
            }
        }

        if !outbound.is_empty() {
            let results = self.execute_batch(&outbound).await;
            for ((index, _), result) in outbound.iter().zip(results) {
                slots[*index] = Some(result);
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    ActionResult::failed(action_id(i), "dispatch produced no result".to_string(), 0)
                })
            })
            .collect()
    }

    async fn execute_batch(&self, outbound: &[(usize, Action)]) -> Vec<ActionResult> {
        if self.config.enable_local_approved_execution {
            return match &self.local_executor {
                Some(executor) => outbound.iter().map(|(_, a)| executor(a)).collect(),
                // The flag without a wired executor is a misconfiguration;
                // refuse rather than silently executing anything here.
                None => outbound
                    .iter()
                    .map(|(i, _)| {
                        ActionResult::failed(
                            format!("a{i}"),
                            "local approved execution is refused".to_string(),
                            0,
                        )
                    })
                    .collect(),
            };
        }

        let actions: Vec<Action> = outbound.iter().map(|(_, a)| a.clone()).collect();
        let count = actions.len();
        match self.post_signed(actions).await {
            Ok(response) => {
                if response.results.len() == count {
                    response.results
                } else {
                    warn!(
                        expected = count,
                        got = response.results.len(),
                        "runner returned misaligned results"
                    );
                    (0..count)
                        .map(|i| {
                            ActionResult::failed(
                                format!("a{i}"),
                                "runner returned misaligned results".to_string(),
                                0,
                            )
                        })
                        .collect()
                }
            }
            Err(e) => {
                let detail = e.to_string();
                OpsEvent {
                    component: "dispatcher",
                    status: Some("failed"),
                    detail: Some(&detail),
                    ..OpsEvent::default()
                }
                .emit(Level::WARN, "dispatch failed");
                (0..count)
                    .map(|i| ActionResult::failed(format!("a{i}"), format!("dispatch failed: {e}"), 0))
                    .collect()
            }
        }
    }

    async fn post_signed(&self, actions: Vec<Action>) -> anyhow::Result<DispatchResponse> {
        let (envelope, body) = self.build_envelope(actions)?;
        let ts = Utc::now().timestamp_millis().to_string();
        let signature = signature_header_value(&ts, &body, &self.config.secret);

        let action_kinds = envelope
            .actions
            .iter()
            .map(Action::kind)
            .collect::<Vec<_>>()
            .join(",");
        OpsEvent {
            component: "dispatcher",
            dispatch_id: Some(&envelope.dispatch_id),
            action_type: Some(&action_kinds),
            status: Some("dispatching"),
            ..OpsEvent::default()
        }
        .emit(Level::INFO, "posting approved actions to runner");
        let resp = self
            .client
            .post(&self.config.runner_url)
            .header("content-type", "application/json")
            .header(DISPATCH_ID_HEADER, &envelope.dispatch_id)
            .header(SIGNATURE_TS_HEADER, &ts)
            .header(SIGNATURE_HEADER, &signature)
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("runner answered {status}: {detail}");
        }
        Ok(resp.json::<DispatchResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoclaw_types::{ActionStatus, SshTarget, WebFetchMode};
    use serde_json::Value;

    fn ssh(command: &str) -> Action {
        Action::Ssh {
            target: SshTarget::William,
            command: command.to_string(),
            reason: "check".to_string(),
            requires_approval: true,
            execution_mode: None,
            parallel_group: None,
        }
    }

    fn blocked_fetch() -> Action {
        Action::WebFetch {
            url: "http://169.254.169.254/latest/meta-data".to_string(),
            reason: "metadata".to_string(),
            mode: WebFetchMode::Http,
            extract: None,
            requires_approval: true,
            execution_mode: None,
            parallel_group: None,
        }
    }

    #[test]
    fn envelope_matches_wire_contract() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
        let (_, body) = dispatcher.build_envelope(vec![ssh("uptime")]).unwrap();
        let mut value: Value = serde_json::from_str(&body).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("dispatchId");
        obj.remove("dispatchedAt");
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!({
                "event": "approved_actions.dispatch",
                "source": "core",
                "actions": [{
                    "type": "ssh",
                    "target": "william",
                    "command": "uptime",
                    "reason": "check",
                    "requiresApproval": true
                }]
            })
        );
    }

    #[tokio::test]
    async fn disabled_execution_skips_everything() {
        let config = DispatcherConfig {
            enable_approved_execution: false,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(config).unwrap();
        let results = dispatcher.dispatch(&[ssh("uptime"), ssh("whoami")]).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == ActionStatus::Skipped));
    }

    #[tokio::test]
    async fn blocked_actions_never_reach_the_wire() {
        // No runner is listening; if the blocked action were dispatched the
        // batch would fail instead of reporting a policy block.
        let config = DispatcherConfig {
            runner_url: "http://127.0.0.1:9/dispatch".to_string(),
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(config).unwrap();
        let results = dispatcher.dispatch(&[blocked_fetch()]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ActionStatus::Blocked);
        assert!(results[0].stderr.contains("safety policy"));
    }

    #[tokio::test]
    async fn results_are_rezipped_to_original_positions() {
        let config = DispatcherConfig {
            enable_local_approved_execution: true,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(config)
            .unwrap()
            .with_local_executor(Arc::new(|action: &Action| {
                ActionResult::ok("local", format!("ran {}", action.kind()), 1)
            }));

        let results = dispatcher
            .dispatch(&[ssh("uptime"), blocked_fetch(), ssh("whoami")])
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, ActionStatus::Ok);
        assert_eq!(results[1].status, ActionStatus::Blocked);
        assert_eq!(results[2].status, ActionStatus::Ok);
    }

    #[tokio::test]
    async fn local_flag_without_executor_is_refused() {
        let config = DispatcherConfig {
            enable_local_approved_execution: true,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(config).unwrap();
        let results = dispatcher.dispatch(&[ssh("uptime")]).await;
        assert_eq!(results[0].status, ActionStatus::Failed);
        assert!(results[0].stderr.contains("refused"));
    }

    #[tokio::test]
    async fn unreachable_runner_fails_the_batch() {
        let config = DispatcherConfig {
            runner_url: "http://127.0.0.1:9/dispatch".to_string(),
            timeout: Duration::from_millis(300),
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(config).unwrap();
        let results = dispatcher.dispatch(&[ssh("uptime")]).await;
        assert_eq!(results[0].status, ActionStatus::Failed);
        assert!(results[0].stderr.contains("dispatch failed"));
    }
}
