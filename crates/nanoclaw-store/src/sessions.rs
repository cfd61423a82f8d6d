use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use crate::atomic::{read_json_or_default, write_json_atomic};

const SESSIONS_FILE: &str = "sessions.json";

/// Planner session ids per group folder, so consecutive turns in one group
/// reuse planner context.
pub struct SessionStore {
    path: PathBuf,
    sessions: RwLock<HashMap<String, String>>,
}

impl SessionStore {
    pub async fn load(data_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = data_dir.as_ref().join(SESSIONS_FILE);
        let sessions: HashMap<String, String> = read_json_or_default(&path).await;
        Ok(Self {
            path,
            sessions: RwLock::new(sessions),
        })
    }

    pub async fn get(&self, group_folder: &str) -> Option<String> {
        self.sessions.read().await.get(group_folder).cloned()
    }

    pub async fn set(&self, group_folder: &str, session_id: &str) -> anyhow::Result<()> {
        let mut guard = self.sessions.write().await;
        guard.insert(group_folder.to_string(), session_id.to_string());
        write_json_atomic(&self.path, &*guard).await
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.sessions.read().await.clone()
    }
}
