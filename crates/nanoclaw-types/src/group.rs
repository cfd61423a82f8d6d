use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat the orchestrator is allowed to act in. The folder doubles as the
/// cooperative namespace for on-disk IPC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredGroup {
    pub name: String,
    pub folder: String,
    pub trigger: String,
    pub added_at: DateTime<Utc>,
}

/// One inbound chat message as surfaced by the durable message store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub chat_id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
