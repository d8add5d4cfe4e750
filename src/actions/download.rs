//! HTTP(S) download of installer binaries.

use crate::step::{ActionContext, ActionOutcome, StepAction};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const USER_AGENT: &str = concat!("deskstrap/", env!("CARGO_PKG_VERSION"));

/// Fetch a URL into a local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Download {
    pub url: String,
    pub destination: PathBuf,
}

impl Download {
    pub fn validate(&self) -> Result<(), String> {
        validate_url(&self.url)?;
        if self.destination.as_os_str().is_empty() {
            return Err("download destination is empty".to_string());
        }
        Ok(())
    }
}

impl StepAction for Download {
    fn run(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        if ctx.dry_run {
            info!("[dry-run] would download {} to {:?}", self.url, self.destination);
            return Ok(ActionOutcome::Completed);
        }
        download_to(&self.url, &self.destination)?;
        Ok(ActionOutcome::Completed)
    }

    fn describe(&self) -> String {
        format!("download {} -> {}", self.url, self.destination.display())
    }
}

/// Only plain HTTP(S) URLs are accepted
pub fn validate_url(url: &str) -> Result<(), String> {
    let url = url.trim();
    if url.is_empty() {
        return Err("download URL is empty".to_string());
    }
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(format!("URL must start with https:// or http://: {}", url));
    }
    Ok(())
}

/// Download `url` to `destination`.
///
/// The body is streamed into `<destination>.part` and renamed on completion,
/// so an interrupted transfer never leaves a truncated file under the final
/// name. Returns the number of bytes written.
pub fn download_to(url: &str, destination: &Path) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }

    info!("Downloading {}", url);
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("building HTTP client")?;

    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("requesting {}", url))?
        .error_for_status()
        .with_context(|| format!("downloading {}", url))?;

    let partial = partial_path(destination);
    let written = (|| -> Result<u64> {
        let mut file =
            fs::File::create(&partial).with_context(|| format!("creating {:?}", partial))?;
        let written = response
            .copy_to(&mut file)
            .with_context(|| format!("reading body of {}", url))?;
        file.sync_all()
            .with_context(|| format!("flushing {:?}", partial))?;
        Ok(written)
    })();

    let written = match written {
        Ok(n) => n,
        Err(e) => {
            if let Err(rm) = fs::remove_file(&partial) {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove partial download {:?}: {}", partial, rm);
                }
            }
            return Err(e);
        }
    };

    fs::rename(&partial, destination)
        .with_context(|| format!("moving {:?} to {:?}", partial, destination))?;
    info!("Downloaded {} bytes to {:?}", written, destination);
    Ok(written)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}
