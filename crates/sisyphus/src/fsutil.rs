//! Directory helpers for the slot scratch space.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use walkdir::WalkDir;

/// Total size in bytes of the files under `dir`
pub async fn folder_size(dir: &Path) -> Result<u64> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut total = 0;
        for entry in WalkDir::new(&dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok::<_, walkdir::Error>(total)
    })
    .await?
    .with_context(|| "Failed to measure directory size")
}

/// Remove everything inside `dir`, keeping `dir` itself
pub async fn empty_dir(dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

/// Make sure `dir` exists and is empty
pub async fn create_or_empty_dir(dir: &Path) -> Result<()> {
    if fs::try_exists(dir).await? {
        empty_dir(dir).await
    } else {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))
    }
}

/// Best-effort cleanup at the end of a task
pub async fn try_empty_dir(dir: &Path) {
    if let Err(e) = empty_dir(dir).await {
        tracing::debug!("Failed to empty {}: {:#}", dir.display(), e);
    }
}

pub async fn try_remove_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("Failed to remove {}: {}", dir.display(), e);
        }
    }
}

/// Open `dir` (recursively) for writing by the sandbox user, or close it
pub async fn set_write_access(dir: &Path, writable: bool) -> Result<()> {
    let dir: PathBuf = dir.to_path_buf();
    let (dir_mode, file_mode) = if writable {
        (0o777, 0o666)
    } else {
        (0o755, 0o755)
    };

    tokio::task::spawn_blocking(move || -> Result<()> {
        for entry in WalkDir::new(&dir) {
            let entry = entry?;
            let mode = if entry.file_type().is_dir() {
                dir_mode
            } else if entry.file_type().is_file() {
                file_mode
            } else {
                continue;
            };
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("Failed to chmod {}", entry.path().display()))?;
        }
        Ok(())
    })
    .await?
}
