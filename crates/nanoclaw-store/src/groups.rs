use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::info;

use nanoclaw_types::RegisteredGroup;

use crate::atomic::{read_json_or_default, write_json_atomic};

const GROUPS_FILE: &str = "registered_groups.json";

/// Folder name of the privileged group allowed to register other groups and
/// manage cross-group schedules.
pub const MAIN_GROUP_FOLDER: &str = "main";

/// Chats the orchestrator is registered in, keyed by chat id. Folders act
/// as cooperative namespaces for on-disk IPC.
pub struct GroupRegistry {
    path: PathBuf,
    groups: RwLock<HashMap<String, RegisteredGroup>>,
}

impl GroupRegistry {
    pub async fn load(data_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = data_dir.as_ref().join(GROUPS_FILE);
        let groups: HashMap<String, RegisteredGroup> = read_json_or_default(&path).await;
        Ok(Self {
            path,
            groups: RwLock::new(groups),
        })
    }

    /// Re-read the document from disk, picking up registrations written by
    /// an earlier process generation.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let groups: HashMap<String, RegisteredGroup> = read_json_or_default(&self.path).await;
        *self.groups.write().await = groups;
        Ok(())
    }

    pub async fn register(&self, chat_id: &str, group: RegisteredGroup) -> anyhow::Result<()> {
        let mut guard = self.groups.write().await;
        info!(chat_id, folder = %group.folder, "group registered");
        guard.insert(chat_id.to_string(), group);
        write_json_atomic(&self.path, &*guard).await
    }

    pub async fn get(&self, chat_id: &str) -> Option<RegisteredGroup> {
        self.groups.read().await.get(chat_id).cloned()
    }

    pub async fn by_folder(&self, folder: &str) -> Option<(String, RegisteredGroup)> {
        self.groups
            .read()
            .await
            .iter()
            .find(|(_, g)| g.folder == folder)
            .map(|(chat_id, g)| (chat_id.clone(), g.clone()))
    }

    pub async fn chat_ids(&self) -> Vec<String> {
        self.groups.read().await.keys().cloned().collect()
    }

    pub async fn folders(&self) -> Vec<String> {
        self.groups
            .read()
            .await
            .values()
            .map(|g| g.folder.clone())
            .collect()
    }

    /// Whether `folder` owns `chat_id`, i.e. the chat is registered under
    /// that folder.
    pub async fn folder_owns_chat(&self, folder: &str, chat_id: &str) -> bool {
        self.groups
            .read()
            .await
            .get(chat_id)
            .map(|g| g.folder == folder)
            .unwrap_or(false)
    }
}
