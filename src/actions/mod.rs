//! Step actions available to catalog entries.
//!
//! - `CopyDir` / `RemovePath` for share copies and cleanup
//! - `Download` for fetching installers
//! - `SilentInstall` / `DownloadInstall` for unattended installer launches
//! - `RunCommand` for anything else
//!
//! `ActionSpec` is the serialized form used in catalog files.

pub mod command;
pub mod download;
pub mod files;
pub mod install;

use crate::step::{ActionContext, ActionOutcome, StepAction};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use command::RunCommand;
pub use download::Download;
pub use files::{CopyDir, RemovePath};
pub use install::{DownloadInstall, ExitClass, InstallerFlavor, SilentInstall};

/// Catalog representation of an action, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    CopyDir(CopyDir),
    Download(Download),
    Install(SilentInstall),
    DownloadInstall(DownloadInstall),
    Command(RunCommand),
    Remove(RemovePath),
}

impl ActionSpec {
    fn as_action(&self) -> &dyn StepAction {
        match self {
            Self::CopyDir(a) => a,
            Self::Download(a) => a,
            Self::Install(a) => a,
            Self::DownloadInstall(a) => a,
            Self::Command(a) => a,
            Self::Remove(a) => a,
        }
    }

    /// Static configuration checks, run when the catalog is loaded
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::CopyDir(a) => a.validate(),
            Self::Download(a) => a.validate(),
            Self::Install(a) => a.validate(),
            Self::DownloadInstall(a) => a.validate(),
            Self::Command(a) => a.validate(),
            Self::Remove(a) => a.validate(),
        }
    }

    /// Programs this action launches that must be resolvable on `PATH`
    pub fn required_programs(&self, msiexec: &str) -> Vec<String> {
        let uses_msiexec = |flavor: InstallerFlavor| flavor == InstallerFlavor::Msi;
        match self {
            Self::Command(c) => vec![c.program.clone()],
            Self::Install(i) if uses_msiexec(i.flavor) => vec![msiexec.to_string()],
            Self::DownloadInstall(d) if uses_msiexec(d.flavor) => vec![msiexec.to_string()],
            _ => Vec::new(),
        }
    }

    /// Local or share paths that must exist before this action runs
    pub fn required_sources(&self) -> Vec<&Path> {
        match self {
            Self::CopyDir(c) => vec![c.source.as_path()],
            _ => Vec::new(),
        }
    }
}

impl StepAction for ActionSpec {
    fn run(&self, ctx: &ActionContext) -> anyhow::Result<ActionOutcome> {
        self.as_action().run(ctx)
    }

    fn describe(&self) -> String {
        self.as_action().describe()
    }
}
