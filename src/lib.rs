//! deskstrap Library
//!
//! Resumable workstation provisioning: an ordered catalog of steps, each
//! guarded by a persistent completion marker, so that a failed or interrupted
//! run picks up at the first unfinished step.

pub mod actions;
pub mod catalog;
pub mod cli;
pub mod error;
pub mod launcher;
pub mod ledger;
pub mod logging;
pub mod process_guard;
pub mod provision;
pub mod reboot;
pub mod runner;
pub mod sanity;
pub mod status;
pub mod step;

// Re-export main types for convenience
pub use actions::{
    ActionSpec, CopyDir, Download, DownloadInstall, ExitClass, InstallerFlavor, RemovePath,
    RunCommand, SilentInstall,
};
pub use catalog::{Catalog, RestartCommand, Settings, StepSpec};
pub use error::{CatalogError, LedgerError, ProvisionError};
pub use launcher::{run_process_safe, LaunchArgs, ProcessOutput};
pub use ledger::{CompletionLedger, DirLedger, MarkerKey, MemoryLedger};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use provision::{run_provisioning, RunOptions, RunSummary, StepStatus};
pub use reboot::{schedule_restart_if_needed, RestartDecision};
pub use runner::{FailurePolicy, RunReport, StepOutcome, StepRecord, StepRunner};
pub use sanity::{verify_environment, PreflightReport};
pub use status::{ConsoleReporter, RecordingReporter, StatusLine, StatusReporter};
pub use step::{ActionContext, ActionOutcome, Step, StepAction};
