//! Pre-flight checks before a run
//!
//! Verifies, for the steps that still have to run:
//! - Share directories used by copy steps are reachable
//! - Programs launched by name (commands, msiexec) are on `PATH`
//! - The marker directory is writable
//!
//! Steps whose marker is already present are ignored, so a share that was
//! only needed by a finished step does not block the rest of the run.

use crate::catalog::Catalog;
use crate::ledger::CompletionLedger;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of environment verification
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PreflightReport {
    /// `(step name, program)` pairs that could not be resolved
    pub missing_programs: Vec<(String, String)>,
    /// `(step name, path)` pairs that do not exist
    pub missing_sources: Vec<(String, PathBuf)>,
    /// Set when the marker directory cannot be written
    pub marker_dir_error: Option<String>,
    /// Number of steps that were checked
    pub pending_steps: usize,
}

impl PreflightReport {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_programs.is_empty()
            && self.missing_sources.is_empty()
            && self.marker_dir_error.is_none()
    }

    /// Operator-readable description of every problem found
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if let Some(e) = &self.marker_dir_error {
            let _ = writeln!(out, "  • marker directory is not writable: {}", e);
        }
        for (step, source) in &self.missing_sources {
            let _ = writeln!(out, "  • {}: source {} is not reachable", step, source.display());
        }
        for (step, program) in &self.missing_programs {
            let _ = writeln!(out, "  • {}: program '{}' not found", step, program);
        }
        out
    }
}

/// Whether a program can be launched: paths must exist, bare names must
/// resolve to a file in one of the `PATH` directories
fn program_exists(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Create the marker directory and a throwaway probe file in it
fn check_marker_dir(dir: &Path) -> Result<(), String> {
    fs::create_dir_all(dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
    let probe = dir.join(".deskstrap-probe");
    fs::write(&probe, b"").map_err(|e| format!("{}: {}", probe.display(), e))?;
    let _ = fs::remove_file(&probe);
    Ok(())
}

/// Check every pending step of `catalog` against the environment.
///
/// The marker directory probe writes to disk, so it is skipped for dry runs.
pub fn verify_environment<L: CompletionLedger>(
    catalog: &Catalog,
    ledger: &L,
    dry_run: bool,
) -> PreflightReport {
    let mut report = PreflightReport::default();
    if !dry_run {
        report.marker_dir_error = check_marker_dir(&catalog.settings.marker_dir).err();
    }

    for step in &catalog.steps {
        // An unreadable marker is treated as pending; the runner reports it properly
        if ledger.has(&step.marker).unwrap_or(false) {
            debug!("Pre-flight: '{}' already completed", step.name);
            continue;
        }
        report.pending_steps += 1;

        for source in step.action.required_sources() {
            if !source.exists() {
                report
                    .missing_sources
                    .push((step.name.clone(), source.to_path_buf()));
            }
        }
        for program in step.action.required_programs(&catalog.settings.msiexec) {
            if !program_exists(&program) {
                report.missing_programs.push((step.name.clone(), program));
            }
        }
    }

    if report.is_ok() {
        info!("Pre-flight checks passed for {} pending step(s)", report.pending_steps);
    }
    report
}
