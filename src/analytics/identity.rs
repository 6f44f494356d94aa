//! Anonymous analytics identifier, persisted once and reused.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// Returns the persisted anonymous id, creating it on first use. Falls back
/// to an in-memory id for this process when the file cannot be used.
pub fn anonymous_id() -> String {
    let loaded = crate::paths::analytics_id_path().and_then(|path| load_or_create(&path));
    match loaded {
        Ok(id) => id,
        Err(e) => {
            warn!("analytics id not persisted, using an in-memory id: {:#}", e);
            Uuid::new_v4().to_string()
        }
    }
}

/// Reads the id stored at `path`, or writes a new UUID v4 there.
///
/// The file is held under an exclusive lock while it is read and written,
/// so concurrent processes agree on a single id.
pub fn load_or_create(path: &Path) -> Result<String> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open analytics id file: {}", path.display()))?;
    file.lock_exclusive()
        .context("Failed to lock analytics id file")?;

    let result = read_or_write(&mut file);
    FileExt::unlock(&file)?;
    result
}

fn read_or_write(file: &mut std::fs::File) -> Result<String> {
    let mut existing = String::new();
    file.read_to_string(&mut existing)
        .context("Failed to read analytics id")?;
    if let Ok(id) = Uuid::parse_str(existing.trim()) {
        return Ok(id.to_string());
    }

    let id = Uuid::new_v4().to_string();
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(id.as_bytes())
        .context("Failed to write analytics id")?;
    file.sync_all()?;
    Ok(id)
}
