//! File system actions: bulk copy from a share and cleanup.

use crate::step::{ActionContext, ActionOutcome, StepAction};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// Copy Directory
// ============================================================================

/// Recursively copy a directory, typically from a mounted network share.
///
/// Existing files at the destination are overwritten; extra files there are
/// left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyDir {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl CopyDir {
    pub fn validate(&self) -> Result<(), String> {
        if self.source.as_os_str().is_empty() {
            return Err("copy source is empty".to_string());
        }
        if self.destination.as_os_str().is_empty() {
            return Err("copy destination is empty".to_string());
        }
        if self.destination.starts_with(&self.source) {
            return Err("copy destination is inside the source".to_string());
        }
        Ok(())
    }
}

impl StepAction for CopyDir {
    fn run(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        if ctx.dry_run {
            info!(
                "[dry-run] would copy {:?} to {:?}",
                self.source, self.destination
            );
            return Ok(ActionOutcome::Completed);
        }

        if !self.source.is_dir() {
            anyhow::bail!("source {:?} is not a reachable directory", self.source);
        }
        let copied = copy_dir_recursive(&self.source, &self.destination).with_context(|| {
            format!("copying {:?} to {:?}", self.source, self.destination)
        })?;
        info!("Copied {} file(s) to {:?}", copied, self.destination);
        Ok(ActionOutcome::Completed)
    }

    fn describe(&self) -> String {
        format!("copy {} -> {}", self.source.display(), self.destination.display())
    }
}

/// Copy `src` into `dst` (created if needed). Returns the number of files copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        // Linked directories are copied as directories
        let is_dir =
            file_type.is_dir() || (file_type.is_symlink() && fs::metadata(&from)?.is_dir());
        if is_dir {
            copied += copy_dir_recursive(&from, &to)?;
        } else {
            // fs::copy follows symlinks, so linked files arrive as plain files
            fs::copy(&from, &to)?;
            debug!("Copied {:?}", to);
            copied += 1;
        }
    }
    Ok(copied)
}

// ============================================================================
// Remove Path
// ============================================================================

/// Delete a file or directory tree. A missing path counts as success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemovePath {
    pub path: PathBuf,
}

impl RemovePath {
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("remove path is empty".to_string());
        }
        if self.path.parent().is_none() {
            return Err(format!("refusing to remove {:?}", self.path));
        }
        Ok(())
    }
}

impl StepAction for RemovePath {
    fn run(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        if ctx.dry_run {
            info!("[dry-run] would remove {:?}", self.path);
            return Ok(ActionOutcome::Completed);
        }
        remove_path(&self.path).with_context(|| format!("removing {:?}", self.path))?;
        Ok(ActionOutcome::Completed)
    }

    fn describe(&self) -> String {
        format!("remove {}", self.path.display())
    }
}

/// Remove a file or directory; `Ok(false)` if nothing was there.
pub fn remove_path(path: &Path) -> std::io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    debug!("Removed {:?}", path);
    Ok(true)
}
