use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::atomic::{read_json_or_default, write_json_atomic};

const STATE_FILE: &str = "router_state.json";

/// Message-loop progress: the global ingest watermark plus the per-chat
/// watermark of the last message the agent actually answered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStateDoc {
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_agent_timestamp: HashMap<String, DateTime<Utc>>,
}

/// Owner of `router_state.json`; written only by the message loop.
pub struct RouterState {
    path: PathBuf,
    doc: RwLock<RouterStateDoc>,
}

impl RouterState {
    pub async fn load(data_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = data_dir.as_ref().join(STATE_FILE);
        let doc: RouterStateDoc = read_json_or_default(&path).await;
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    pub async fn snapshot(&self) -> RouterStateDoc {
        self.doc.read().await.clone()
    }

    pub async fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.doc.read().await.last_timestamp
    }

    /// Advance the global watermark. Strictly monotone: an older or equal
    /// timestamp is ignored so a retried batch cannot move it backwards.
    pub async fn advance_last_timestamp(&self, ts: DateTime<Utc>) -> anyhow::Result<()> {
        let mut guard = self.doc.write().await;
        match guard.last_timestamp {
            Some(current) if ts <= current => return Ok(()),
            _ => guard.last_timestamp = Some(ts),
        }
        write_json_atomic(&self.path, &*guard).await
    }

    pub async fn agent_watermark(&self, chat_id: &str) -> Option<DateTime<Utc>> {
        self.doc
            .read()
            .await
            .last_agent_timestamp
            .get(chat_id)
            .copied()
    }

    pub async fn set_agent_watermark(
        &self,
        chat_id: &str,
        ts: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut guard = self.doc.write().await;
        guard.last_agent_timestamp.insert(chat_id.to_string(), ts);
        write_json_atomic(&self.path, &*guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn watermark_is_strictly_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let state = RouterState::load(dir.path()).await.unwrap();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);

        state.advance_last_timestamp(t1).await.unwrap();
        state.advance_last_timestamp(t0).await.unwrap();
        assert_eq!(state.last_timestamp().await, Some(t1));
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Utc::now();
        {
            let state = RouterState::load(dir.path()).await.unwrap();
            state.advance_last_timestamp(ts).await.unwrap();
            state.set_agent_watermark("chat-1", ts).await.unwrap();
        }
        let state = RouterState::load(dir.path()).await.unwrap();
        assert_eq!(state.last_timestamp().await, Some(ts));
        assert_eq!(state.agent_watermark("chat-1").await, Some(ts));
        assert_eq!(state.agent_watermark("chat-2").await, None);
    }
}
