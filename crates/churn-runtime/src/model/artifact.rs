//! Model artifact directory IO
//!
//! A model version is one directory. It is written into a hidden staging
//! sibling and renamed into place, so readers see either the previous
//! complete directory or the new complete one.

use crate::error::{Result, RuntimeError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Sortable identifier for a newly trained model
pub fn model_version() -> String {
    chrono::Utc::now().format("v%Y%m%d_%H%M%S").to_string()
}

pub fn write_json<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(dir.join(file), content)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<T> {
    let path = dir.join(file);
    let content = fs::read_to_string(&path)
        .map_err(|e| RuntimeError::Artifact(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| RuntimeError::Artifact(format!("malformed {}: {}", path.display(), e)))
}

fn sibling(target: &Path, tag: &str) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            RuntimeError::Artifact(format!("invalid artifact path {}", target.display()))
        })?;
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{}.{}-{}", name, tag, Uuid::new_v4())))
}

/// Populate a fresh directory with `write` and publish it at `target`.
///
/// An existing `target` is replaced only after the new content is complete.
pub fn publish_dir<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let staging = sibling(target, "staging")?;
    fs::create_dir_all(&staging)?;
    if let Err(e) = write(&staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if !target.exists() {
        if let Err(e) = fs::rename(&staging, target) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        debug!("Published {}", target.display());
        return Ok(());
    }

    let backup = sibling(target, "backup")?;
    fs::rename(target, &backup)?;
    if let Err(e) = fs::rename(&staging, target) {
        // put the previous version back
        if let Err(restore) = fs::rename(&backup, target) {
            warn!(
                "Could not restore {} from {}: {}",
                target.display(),
                backup.display(),
                restore
            );
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(e.into());
    }
    if let Err(e) = fs::remove_dir_all(&backup) {
        warn!("Could not remove backup {}: {}", backup.display(), e);
    }
    debug!("Replaced {}", target.display());
    Ok(())
}
