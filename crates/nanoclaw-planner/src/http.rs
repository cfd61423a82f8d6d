use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{Planner, PlannerReply, PlannerRequest};

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub base_url: String,
    pub api_key: String,
    pub completion_model: String,
    pub reasoning_model: String,
    /// When set, model ids must carry the free-tier marker.
    pub require_free_models: bool,
    pub timeout: Duration,
}

impl PlannerConfig {
    /// Reject non-free model ids when the deployment requires free tiers.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.trim().is_empty() {
            bail!("planner base url is empty");
        }
        if self.require_free_models {
            for model in [&self.completion_model, &self.reasoning_model] {
                if !model.ends_with(":free") {
                    bail!("model `{model}` is not a free-tier id");
                }
            }
        }
        Ok(())
    }
}

/// Agent-server planner client: `POST /session` to open a session and
/// `POST /session/{id}/prompt_sync` for each turn.
pub struct HttpPlanner {
    config: PlannerConfig,
    client: Client,
}

impl HttpPlanner {
    pub fn new(config: PlannerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building planner http client")?;
        Ok(Self { config, client })
    }

    async fn create_session(&self) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/session", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "model": self.config.completion_model }))
            .send()
            .await
            .context("planner session create request failed")?;
        if !resp.status().is_success() {
            bail!("planner session create failed ({})", resp.status());
        }
        let body: Value = resp.json().await.context("planner session response")?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("planner session response carried no id")
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan_turn(&self, request: PlannerRequest) -> anyhow::Result<PlannerReply> {
        let session_id = match request.session_id {
            Some(id) => id,
            None => self.create_session().await?,
        };

        let model = if request.scheduled {
            &self.config.completion_model
        } else {
            &self.config.reasoning_model
        };
        let body = json!({
            "model": model,
            "scheduled": request.scheduled,
            "parts": [{ "type": "text", "text": request.prompt }],
        });

        debug!(session_id = %session_id, scheduled = request.scheduled, "planner turn");
        let resp = self
            .client
            .post(format!(
                "{}/session/{}/prompt_sync",
                self.config.base_url, session_id
            ))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("planner prompt request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            warn!(%status, "planner prompt failed");
            bail!("planner prompt failed ({status}): {detail}");
        }

        let body: Value = resp.json().await.context("planner prompt response")?;
        let text = body
            .get("text")
            .or_else(|| body.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if text.is_empty() {
            bail!("planner returned no text");
        }
        Ok(PlannerReply {
            text,
            session_id: Some(session_id),
        })
    }
}
