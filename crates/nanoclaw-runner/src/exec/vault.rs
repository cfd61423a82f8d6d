use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use nanoclaw_types::ActionResult;

use crate::RunnerState;

/// Append patch content to a note inside the configured vault. Paths are
/// resolved strictly inside the vault root; absolute paths and parent
/// traversal are blocked, not normalized away.
pub(crate) async fn execute(
    state: &RunnerState,
    path: &str,
    patch: &str,
    action_id: String,
) -> ActionResult {
    let Some(vault_root) = state.config.vault_root.clone() else {
        return ActionResult::failed(action_id, "vault root not configured".to_string(), 0);
    };
    let Some(relative) = vault_relative(path) else {
        return ActionResult::blocked(action_id, format!("path `{path}` escapes the vault"));
    };

    let target = vault_root.join(relative);
    let started = Instant::now();
    if let Some(parent) = target.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            return ActionResult::failed(
                action_id,
                format!("creating note directory failed: {e}"),
                started.elapsed().as_millis() as u64,
            );
        }
    }

    let mut content = patch.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }

    let write = async {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok::<_, std::io::Error>(())
    };

    match write.await {
        Ok(()) => ActionResult::ok(
            action_id,
            format!("appended {} bytes to {path}", content.len()),
            started.elapsed().as_millis() as u64,
        ),
        Err(e) => ActionResult::failed(
            action_id,
            format!("vault write failed: {e}"),
            started.elapsed().as_millis() as u64,
        ),
    }
}

/// Normal components only; anything absolute or escaping is rejected.
fn vault_relative(path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    if path.is_absolute() {
        return None;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
