//! Silent (unattended) installer launches.
//!
//! Each installer technology has its own switches for "no prompts, no
//! automatic restart". `InstallerFlavor` owns those switches so catalog entries
//! only list the product-specific arguments.
//!
//! # Exit status
//!
//! | class           | default codes | step result                 |
//! |-----------------|---------------|-----------------------------|
//! | success         | `0`           | `Completed`                 |
//! | reboot required | `3010`        | `RebootRequired`            |
//! | anything else   |               | failure, no marker written  |

use super::download::{download_to, validate_url};
use super::files::remove_path;
use crate::launcher::{run_process_safe, LaunchArgs};
use crate::step::{ActionContext, ActionOutcome, StepAction};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};
use tracing::{info, warn};

/// Conventional "success, restart required" installer exit status
pub const REBOOT_REQUIRED_EXIT_CODE: i32 = 3010;

fn default_success_codes() -> Vec<i32> {
    vec![0]
}

fn default_reboot_codes() -> Vec<i32> {
    vec![REBOOT_REQUIRED_EXIT_CODE]
}

/// Installer technology, which decides the unattended switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstallerFlavor {
    /// Windows Installer package, launched through msiexec
    Msi,
    /// Inno Setup executable
    Inno,
    /// Nullsoft (NSIS) executable
    Nsis,
    /// Unknown technology; only the catalog's own arguments are passed
    #[default]
    Custom,
}

impl InstallerFlavor {
    /// Switches placed after the installer (or after `/i <package>` for msi)
    pub fn silent_flags(self) -> &'static [&'static str] {
        match self {
            Self::Msi => &["/qn", "/norestart"],
            Self::Inno => &["/VERYSILENT", "/SUPPRESSMSGBOXES", "/NORESTART", "/SP-"],
            Self::Nsis => &["/S"],
            Self::Custom => &[],
        }
    }
}

/// How an exit status is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    RebootRequired,
    Failure,
}

/// Classify an exit status. Reboot codes win over success codes.
pub fn classify_exit(code: Option<i32>, success_codes: &[i32], reboot_codes: &[i32]) -> ExitClass {
    match code {
        Some(c) if reboot_codes.contains(&c) => ExitClass::RebootRequired,
        Some(c) if success_codes.contains(&c) => ExitClass::Success,
        _ => ExitClass::Failure,
    }
}

// ============================================================================
// Silent Install
// ============================================================================

/// Run an installer that is already on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SilentInstall {
    pub installer: PathBuf,
    #[serde(default)]
    pub flavor: InstallerFlavor,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<i32>,
    #[serde(default = "default_reboot_codes")]
    pub reboot_codes: Vec<i32>,
    /// Delete the installer file after a successful run
    #[serde(default)]
    pub remove_after: bool,
}

impl SilentInstall {
    /// Installer with default exit code handling
    pub fn new(installer: impl Into<PathBuf>, flavor: InstallerFlavor) -> Self {
        Self {
            installer: installer.into(),
            flavor,
            args: Vec::new(),
            success_codes: default_success_codes(),
            reboot_codes: default_reboot_codes(),
            remove_after: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.installer.as_os_str().is_empty() {
            return Err("installer path is empty".to_string());
        }
        validate_codes(&self.success_codes, &self.reboot_codes)
    }

    fn launch<'a>(&'a self, msiexec: &'a str) -> InstallerLaunch<'a> {
        InstallerLaunch {
            installer: &self.installer,
            flavor: self.flavor,
            extra_args: &self.args,
            msiexec,
        }
    }

    /// Launch, classify, and optionally delete the installer
    fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        let launch = self.launch(&ctx.msiexec);
        if ctx.dry_run {
            info!("[dry-run] would run: {}", launch.command_line());
            return Ok(ActionOutcome::Completed);
        }

        if !self.installer.exists() && self.installer.components().count() > 1 {
            anyhow::bail!("installer {:?} not found", self.installer);
        }

        let output = run_process_safe(&launch)?;
        let outcome = match classify_exit(output.exit_code, &self.success_codes, &self.reboot_codes)
        {
            ExitClass::Success => ActionOutcome::Completed,
            ExitClass::RebootRequired => {
                info!(
                    "{:?} finished and requested a restart (exit code {:?})",
                    self.installer, output.exit_code
                );
                ActionOutcome::RebootRequired
            }
            ExitClass::Failure => {
                let code = output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let tail = output.stderr_tail();
                if tail.is_empty() {
                    anyhow::bail!("installer {:?} exited with code {}", self.installer, code);
                }
                anyhow::bail!(
                    "installer {:?} exited with code {}: {}",
                    self.installer,
                    code,
                    tail
                );
            }
        };

        if self.remove_after {
            remove_path(&self.installer)
                .with_context(|| format!("removing installer {:?}", self.installer))?;
        }
        Ok(outcome)
    }
}

impl StepAction for SilentInstall {
    fn run(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        self.execute(ctx)
    }

    fn describe(&self) -> String {
        format!("install {} ({})", self.installer.display(), self.flavor)
    }
}

fn validate_codes(success_codes: &[i32], reboot_codes: &[i32]) -> Result<(), String> {
    if success_codes.is_empty() {
        return Err("success_codes must not be empty".to_string());
    }
    if let Some(c) = success_codes.iter().find(|c| reboot_codes.contains(c)) {
        return Err(format!(
            "exit code {} is listed as both success and reboot",
            c
        ));
    }
    Ok(())
}

/// Typed command line for an installer launch.
#[derive(Debug, Clone)]
pub struct InstallerLaunch<'a> {
    pub installer: &'a Path,
    pub flavor: InstallerFlavor,
    pub extra_args: &'a [String],
    pub msiexec: &'a str,
}

impl LaunchArgs for InstallerLaunch<'_> {
    fn program(&self) -> String {
        match self.flavor {
            InstallerFlavor::Msi => self.msiexec.to_string(),
            _ => self.installer.display().to_string(),
        }
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.flavor == InstallerFlavor::Msi {
            args.push("/i".to_string());
            args.push(self.installer.display().to_string());
        }
        args.extend(self.flavor.silent_flags().iter().map(|f| f.to_string()));
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

// ============================================================================
// Download + Install
// ============================================================================

/// Download an installer into the staging directory, run it, delete it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadInstall {
    pub url: String,
    /// File name inside the staging directory
    pub file_name: String,
    #[serde(default)]
    pub flavor: InstallerFlavor,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<i32>,
    #[serde(default = "default_reboot_codes")]
    pub reboot_codes: Vec<i32>,
}

impl DownloadInstall {
    pub fn validate(&self) -> Result<(), String> {
        validate_url(&self.url)?;
        let name = self.file_name.trim();
        if name.is_empty() {
            return Err("file_name is empty".to_string());
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(format!("file_name must be a plain file name: {}", name));
        }
        validate_codes(&self.success_codes, &self.reboot_codes)
    }

    fn staged_install(&self, ctx: &ActionContext) -> SilentInstall {
        SilentInstall {
            installer: ctx.staging_dir.join(&self.file_name),
            flavor: self.flavor,
            args: self.args.clone(),
            success_codes: self.success_codes.clone(),
            reboot_codes: self.reboot_codes.clone(),
            remove_after: false,
        }
    }
}

impl StepAction for DownloadInstall {
    fn run(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        let install = self.staged_install(ctx);
        if ctx.dry_run {
            info!(
                "[dry-run] would download {} to {:?}",
                self.url, install.installer
            );
            return install.execute(ctx);
        }

        download_to(&self.url, &install.installer)?;
        let result = install.execute(ctx);

        // Staged file is ours; drop it whatever the installer said
        if let Err(e) = remove_path(&install.installer) {
            warn!("Could not remove staged installer {:?}: {}", install.installer, e);
        }
        result
    }

    fn describe(&self) -> String {
        format!("download and install {} ({})", self.url, self.flavor)
    }
}
