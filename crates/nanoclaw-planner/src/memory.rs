use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

/// Most characters of notes prepended to a single turn.
const MEMORY_HEADER_MAX_CHARS: usize = 4000;

/// External memory collaborator. Implementations produce a header prepended
/// to the user prompt; an empty string means no memory context.
#[async_trait]
pub trait MemorySource: Send + Sync {
    async fn memory_header(&self, group_folder: &str, query: &str) -> anyhow::Result<String>;
}

pub struct NoopMemory;

#[async_trait]
impl MemorySource for NoopMemory {
    async fn memory_header(&self, _group_folder: &str, _query: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

/// Reads `<root>/<group>/MEMORY.md` verbatim, truncated to a fixed cap.
/// Indexing or retrieval heuristics stay in the external collaborator.
pub struct NotesDirMemory {
    root: PathBuf,
}

impl NotesDirMemory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl MemorySource for NotesDirMemory {
    async fn memory_header(&self, group_folder: &str, _query: &str) -> anyhow::Result<String> {
        let path = self.root.join(group_folder).join("MEMORY.md");
        let Ok(content) = fs::read_to_string(&path).await else {
            return Ok(String::new());
        };
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(String::new());
        }
        debug!(path = %path.display(), "memory header loaded");
        let mut body = trimmed.to_string();
        if body.len() > MEMORY_HEADER_MAX_CHARS {
            let cut = body
                .char_indices()
                .take_while(|(i, _)| *i < MEMORY_HEADER_MAX_CHARS)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(MEMORY_HEADER_MAX_CHARS);
            body.truncate(cut);
        }
        Ok(format!("## Memory\n{body}\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_notes_yield_empty_header() {
        let dir = tempfile::tempdir().unwrap();
        let memory = NotesDirMemory::new(dir.path());
        let header = memory.memory_header("main", "anything").await.unwrap();
        assert!(header.is_empty());
    }

    #[tokio::test]
    async fn notes_are_wrapped_in_header() {
        let dir = tempfile::tempdir().unwrap();
        let group_dir = dir.path().join("main");
        std::fs::create_dir_all(&group_dir).unwrap();
        std::fs::write(group_dir.join("MEMORY.md"), "william runs the backups\n").unwrap();

        let memory = NotesDirMemory::new(dir.path());
        let header = memory.memory_header("main", "backups").await.unwrap();
        assert!(header.starts_with("## Memory\n"));
        assert!(header.contains("william runs the backups"));
    }

    #[tokio::test]
    async fn long_notes_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let group_dir = dir.path().join("main");
        std::fs::create_dir_all(&group_dir).unwrap();
        std::fs::write(group_dir.join("MEMORY.md"), "x".repeat(20_000)).unwrap();

        let memory = NotesDirMemory::new(dir.path());
        let header = memory.memory_header("main", "q").await.unwrap();
        assert!(header.len() < 5000);
    }
}
