//! Provisioning driver
//!
//! Ties the pieces together for the `run`, `status` and `reset` commands:
//! validate catalog, pre-flight, step runner, restart scheduling. Console and
//! exit code handling stay in the binary.

use crate::catalog::Catalog;
use crate::error::{ProvisionError, Result};
use crate::ledger::{CompletionLedger, MarkerKey};
use crate::reboot::{schedule_restart_if_needed, RestartDecision};
use crate::runner::{FailurePolicy, RunReport, StepRunner};
use crate::sanity::verify_environment;
use crate::status::StatusReporter;
use crate::step::StepAction;
use tracing::{info, warn};

/// Options for a provisioning run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub policy: FailurePolicy,
    pub no_restart: bool,
    pub skip_preflight: bool,
}

/// Result of a complete run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub report: RunReport,
    pub restart: RestartDecision,
}

/// Validate, check the environment, run every step and schedule the restart.
///
/// Step failures are part of the returned report, not an `Err`. Errors are
/// reserved for problems that prevent the run from starting and for a
/// restart command that could not be launched.
pub fn run_provisioning<L, R>(
    catalog: &Catalog,
    ledger: &mut L,
    reporter: &mut R,
    opts: RunOptions,
) -> Result<RunSummary>
where
    L: CompletionLedger,
    R: StatusReporter,
{
    catalog.validate()?;

    if opts.skip_preflight {
        warn!("Pre-flight checks skipped on request");
    } else {
        let preflight = verify_environment(catalog, ledger, opts.dry_run);
        if !preflight.is_ok() {
            return Err(ProvisionError::preflight(preflight.describe()));
        }
    }

    if opts.dry_run {
        info!("Dry run: no markers will be written");
    }
    info!(
        "Running {} step(s), failure policy: {}",
        catalog.steps.len(),
        opts.policy
    );

    let steps = catalog.to_steps();
    let mut runner = StepRunner::new(
        &mut *ledger,
        &mut *reporter,
        catalog.action_context(opts.dry_run),
    );
    let report = runner.run_catalog(&steps, opts.policy);

    let restart = schedule_restart_if_needed(
        &report,
        &catalog.settings.restart,
        opts.no_restart || opts.dry_run,
    )?;

    Ok(RunSummary { report, restart })
}

/// Completion state of one catalog step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub name: String,
    pub marker: MarkerKey,
    pub completed: bool,
    pub action: String,
}

/// Completion state of every catalog step, in catalog order
pub fn step_statuses<L: CompletionLedger>(catalog: &Catalog, ledger: &L) -> Result<Vec<StepStatus>> {
    catalog
        .steps
        .iter()
        .map(|step| {
            Ok(StepStatus {
                name: step.name.clone(),
                marker: step.marker.clone(),
                completed: ledger.has(&step.marker)?,
                action: step.action.describe(),
            })
        })
        .collect()
}

/// Markers present in the ledger that no catalog step uses
pub fn orphan_markers<L: CompletionLedger>(catalog: &Catalog, ledger: &L) -> Result<Vec<MarkerKey>> {
    Ok(ledger
        .keys()?
        .into_iter()
        .filter(|key| catalog.step_by_marker(key).is_none())
        .collect())
}

/// Remove completion markers.
///
/// With `all`, every marker in the ledger is removed; otherwise the named
/// ones. Returns each key with whether it was present. In dry-run mode
/// nothing is removed and presence is only reported.
pub fn reset_markers<L: CompletionLedger>(
    catalog: &Catalog,
    ledger: &mut L,
    markers: &[String],
    all: bool,
    dry_run: bool,
) -> Result<Vec<(MarkerKey, bool)>> {
    let keys = if all {
        ledger.keys()?
    } else {
        markers
            .iter()
            .map(|m| MarkerKey::new(m.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut results = Vec::with_capacity(keys.len());
    for key in keys {
        if catalog.step_by_marker(&key).is_none() {
            warn!("Marker '{}' is not used by any step in the catalog", key);
        }
        let present = if dry_run {
            ledger.has(&key)?
        } else {
            let removed = ledger.clear(&key)?;
            if removed {
                info!("Reset marker '{}'", key);
            }
            removed
        };
        results.push((key, present));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::runner::StepOutcome;
    use crate::status::RecordingReporter;

    fn catalog(markers_dir: &std::path::Path) -> Catalog {
        let json = format!(
            r#"{{
                "settings": {{
                    "marker_dir": "{}",
                    "restart": {{ "program": "sh", "args": ["-c", "exit 9"] }}
                }},
                "steps": [
                    {{ "name": "First", "marker": "first",
                       "action": {{ "kind": "command", "program": "true" }} }},
                    {{ "name": "Second", "marker": "second",
                       "action": {{ "kind": "command", "program": "false" }} }},
                    {{ "name": "Third", "marker": "third",
                       "action": {{ "kind": "command", "program": "true" }} }}
                ]
            }}"#,
            markers_dir.display()
        );
        Catalog::from_json_str(&json).unwrap()
    }

    fn key(s: &str) -> MarkerKey {
        MarkerKey::new(s).unwrap()
    }

    #[test]
    fn test_run_halts_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let mut ledger = MemoryLedger::new();
        let mut reporter = RecordingReporter::new();

        let summary =
            run_provisioning(&catalog, &mut ledger, &mut reporter, RunOptions::default()).unwrap();

        assert!(!summary.report.is_success());
        assert_eq!(summary.report.halted_at.as_deref(), Some("Second"));
        assert_eq!(summary.restart, RestartDecision::NotNeeded);
        assert!(ledger.has(&key("first")).unwrap());
        assert!(!ledger.has(&key("third")).unwrap());
        assert!(reporter.lines.iter().any(|l| l.starts_with("Second : FAILED - ")));
    }

    #[test]
    fn test_keep_going_runs_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let mut ledger = MemoryLedger::new();
        let mut reporter = RecordingReporter::new();
        let opts = RunOptions {
            policy: FailurePolicy::Continue,
            ..RunOptions::default()
        };

        let summary = run_provisioning(&catalog, &mut ledger, &mut reporter, opts).unwrap();

        assert_eq!(summary.report.failures().count(), 1);
        assert!(ledger.has(&key("third")).unwrap());
    }

    #[test]
    fn test_preflight_failure_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        catalog.steps[0].action = crate::actions::ActionSpec::Command(
            crate::actions::RunCommand::new("this_binary_definitely_does_not_exist_12345", Vec::<String>::new()),
        );
        let mut ledger = MemoryLedger::new();
        let mut reporter = RecordingReporter::new();

        let err = run_provisioning(&catalog, &mut ledger, &mut reporter, RunOptions::default())
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Preflight(_)));
        assert!(reporter.lines.is_empty());
        assert_eq!(ledger.write_count(), 0);
    }

    #[test]
    fn test_invalid_catalog_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        catalog.steps[2].marker = key("first");
        let err = run_provisioning(
            &catalog,
            &mut MemoryLedger::new(),
            &mut RecordingReporter::new(),
            RunOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::Catalog(_)));
    }

    #[test]
    fn test_dry_run_suppresses_markers() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        catalog.steps.remove(1);
        let mut ledger = MemoryLedger::new();
        let opts = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };

        let summary =
            run_provisioning(&catalog, &mut ledger, &mut RecordingReporter::new(), opts).unwrap();

        assert!(summary.report.is_success());
        assert!(summary
            .report
            .records
            .iter()
            .all(|r| r.outcome == StepOutcome::Succeeded { reboot_required: false }));
        assert_eq!(ledger.write_count(), 0);
    }

    #[test]
    fn test_statuses_and_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let ledger = MemoryLedger::with_keys([key("second"), key("retired-step")]);

        let statuses = step_statuses(&catalog, &ledger).unwrap();
        let completed: Vec<bool> = statuses.iter().map(|s| s.completed).collect();
        assert_eq!(completed, vec![false, true, false]);
        assert!(statuses[0].action.contains("true"));

        assert_eq!(orphan_markers(&catalog, &ledger).unwrap(), vec![key("retired-step")]);
    }

    #[test]
    fn test_reset_named_and_all() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let mut ledger = MemoryLedger::with_keys([key("first"), key("second")]);

        let dry = reset_markers(&catalog, &mut ledger, &["first".to_string()], false, true).unwrap();
        assert_eq!(dry, vec![(key("first"), true)]);
        assert!(ledger.has(&key("first")).unwrap());

        let named = reset_markers(
            &catalog,
            &mut ledger,
            &["first".to_string(), "third".to_string()],
            false,
            false,
        )
        .unwrap();
        assert_eq!(named, vec![(key("first"), true), (key("third"), false)]);
        assert!(!ledger.has(&key("first")).unwrap());

        let all = reset_markers(&catalog, &mut ledger, &[], true, false).unwrap();
        assert_eq!(all, vec![(key("second"), true)]);
        assert!(ledger.keys().unwrap().is_empty());
    }

    #[test]
    fn test_reset_rejects_invalid_key() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let err = reset_markers(&catalog, &mut MemoryLedger::new(), &["../x".to_string()], false, false)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Ledger(_)));
    }
}
