//! Deferred restart after a run that asked for one.

use crate::catalog::RestartCommand;
use crate::error::{ProvisionError, Result};
use crate::launcher::{run_process_safe, LaunchArgs};
use crate::runner::RunReport;
use tracing::{info, warn};

impl LaunchArgs for RestartCommand {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        self.args.clone()
    }
}

/// What happened to the restart request at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// No step asked for a restart
    NotNeeded,
    /// A step failed or the run was interrupted; restarting now would hide it
    Withheld,
    /// The operator disabled restarts (`--no-restart` or `--dry-run`)
    Suppressed,
    /// The restart command ran
    Scheduled,
}

/// Run the restart command if the report calls for it.
pub fn schedule_restart_if_needed(
    report: &RunReport,
    command: &RestartCommand,
    suppressed: bool,
) -> Result<RestartDecision> {
    if !report.reboot_requested {
        return Ok(RestartDecision::NotNeeded);
    }
    if let Some(sig) = report.interrupted {
        warn!(
            "A restart was requested but the run was interrupted by signal {}; not restarting",
            sig
        );
        return Ok(RestartDecision::Withheld);
    }
    if !report.is_success() {
        warn!("A restart was requested but the run failed; not restarting");
        return Ok(RestartDecision::Withheld);
    }
    if suppressed {
        warn!(
            "A restart is required; skipped on request (would run: {})",
            command.command_line()
        );
        return Ok(RestartDecision::Suppressed);
    }

    info!("Scheduling restart: {}", command.command_line());
    let output = run_process_safe(command)
        .map_err(|e| ProvisionError::restart(format!("{:#}", e)))?;
    output
        .ensure_success(&command.program)
        .map_err(|e| ProvisionError::restart(format!("{:#}", e)))?;
    Ok(RestartDecision::Scheduled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MarkerKey;
    use crate::runner::{StepOutcome, StepRecord};

    fn report(reboot: bool, failed: bool) -> RunReport {
        let outcome = if failed {
            StepOutcome::Failed {
                message: "x".to_string(),
            }
        } else {
            StepOutcome::Succeeded {
                reboot_required: reboot,
            }
        };
        RunReport {
            records: vec![StepRecord {
                name: "Runtime".to_string(),
                marker: MarkerKey::new("runtime").unwrap(),
                outcome,
            }],
            reboot_requested: reboot,
            halted_at: None,
            interrupted: None,
        }
    }

    fn restart_cmd(script: &str) -> RestartCommand {
        RestartCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn test_not_needed_runs_nothing() {
        let decision =
            schedule_restart_if_needed(&report(false, false), &restart_cmd("exit 1"), false).unwrap();
        assert_eq!(decision, RestartDecision::NotNeeded);
    }

    #[test]
    fn test_scheduled_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("restarted");
        let cmd = restart_cmd(&format!("touch '{}'", flag.display()));

        let decision = schedule_restart_if_needed(&report(true, false), &cmd, false).unwrap();

        assert_eq!(decision, RestartDecision::Scheduled);
        assert!(flag.exists());
    }

    #[test]
    fn test_suppressed_does_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("restarted");
        let cmd = restart_cmd(&format!("touch '{}'", flag.display()));

        let decision = schedule_restart_if_needed(&report(true, false), &cmd, true).unwrap();

        assert_eq!(decision, RestartDecision::Suppressed);
        assert!(!flag.exists());
    }

    #[test]
    fn test_failed_run_withholds_restart() {
        let mut r = report(true, true);
        r.reboot_requested = true;
        let decision = schedule_restart_if_needed(&r, &restart_cmd("exit 1"), false).unwrap();
        assert_eq!(decision, RestartDecision::Withheld);
    }

    #[test]
    fn test_interrupted_run_withholds_restart() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("restarted");
        let mut r = report(true, false);
        r.interrupted = Some(15);

        let cmd = restart_cmd(&format!("touch '{}'", flag.display()));

        let decision = schedule_restart_if_needed(&r, &cmd, false).unwrap();

        assert_eq!(decision, RestartDecision::Withheld);
        assert!(!flag.exists());
    }

    #[test]
    fn test_restart_command_failure_is_error() {
        let err = schedule_restart_if_needed(&report(true, false), &restart_cmd("exit 4"), false)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Restart(_)));
    }
}
