use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

/// Write `value` as pretty JSON via a temp file followed by a rename, so a
/// crash mid-write never leaves a torn document behind.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Load a JSON document, falling back to `T::default()` when the file is
/// missing or unreadable as `T`.
pub async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(bytes) = fs::read(path).await else {
        return T::default();
    };
    serde_json::from_slice(&bytes).unwrap_or_default()
}
