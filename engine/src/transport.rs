use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use nanoclaw_gateway::ChatTransport;

/// Chat egress via the external bot bridge: one JSON POST per outbound
/// message. Approval prompts carry the inline-button payloads the bridge
/// renders (`approve:<id>`, `deny:<id>`, `reason:<id>`).
pub struct BotBridgeTransport {
    egress_url: Option<String>,
    client: Client,
}

impl BotBridgeTransport {
    pub fn new(egress_url: Option<String>) -> anyhow::Result<Self> {
        if egress_url.is_none() {
            warn!("NANOCLAW_BOT_EGRESS_URL not set; outbound chat messages will be dropped");
        }
        Ok(Self {
            egress_url,
            client: Client::builder().timeout(Duration::from_secs(15)).build()?,
        })
    }

    async fn post(&self, body: serde_json::Value) -> anyhow::Result<()> {
        let Some(url) = &self.egress_url else {
            warn!("dropping outbound chat message (no egress configured)");
            return Ok(());
        };
        let resp = self.client.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("bot egress answered {}", resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for BotBridgeTransport {
    async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        self.post(json!({ "chatId": chat_id, "text": text })).await
    }

    async fn send_approval_prompt(
        &self,
        chat_id: &str,
        text: &str,
        proposal_id: &str,
    ) -> anyhow::Result<()> {
        self.post(json!({
            "chatId": chat_id,
            "text": text,
            "buttons": [
                { "text": "✅ Approve", "callback": format!("approve:{proposal_id}") },
                { "text": "🚫 Deny", "callback": format!("deny:{proposal_id}") },
                { "text": "📝 Deny with reason", "callback": format!("reason:{proposal_id}") },
            ],
        }))
        .await
    }
}
