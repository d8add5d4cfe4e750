//! Resumable Step Runner
//!
//! Executes catalog steps exactly once across repeated invocations of the
//! provisioner, using the completion ledger as the only memory between runs.
//!
//! # Per-step state machine
//!
//! ```text
//! Pending
//!     ↓ (check marker)
//!     ├── present ──→ Skipped              (terminal for this run)
//!     └── absent ───→ Running
//!                        ├── Ok  ──→ Succeeded (marker written)
//!                        └── Err ──→ Failed    (no marker, still Pending next run)
//! ```
//!
//! # Guarantees
//!
//! - The action is never invoked when the marker is present
//! - The marker is written only after the action returns `Ok`
//! - At most one ledger write per step
//! - No retries inside a run; resuming is the next invocation's job

use crate::ledger::{CompletionLedger, MarkerKey};
use crate::process_guard::interrupted;
use crate::status::{StatusLine, StatusReporter};
use crate::step::{ActionContext, Step};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, error, info, warn};

/// What the driver does after a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failed step
    #[default]
    Halt,
    /// Record the failure and run the remaining steps
    Continue,
}

/// Result of one `run_step` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Marker was already present; action not invoked
    Skipped,
    /// Action finished and the marker was written
    Succeeded { reboot_required: bool },
    /// Action or marker write failed; no marker written
    Failed { message: String },
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Outcome of a single step within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub marker: MarkerKey,
    pub outcome: StepOutcome,
}

/// Aggregated result of running a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// One record per step that was reached, in catalog order
    pub records: Vec<StepRecord>,
    /// True iff a step succeeded and asked for a restart
    pub reboot_requested: bool,
    /// Name of the step the run stopped at, under `FailurePolicy::Halt`
    pub halted_at: Option<String>,
    /// Signal that stopped the run before every step was reached
    pub interrupted: Option<i32>,
}

impl RunReport {
    /// No step failed and the run was not interrupted
    pub fn is_success(&self) -> bool {
        self.interrupted.is_none() && !self.records.iter().any(|r| r.outcome.is_failed())
    }

    /// Records of failed steps
    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(|r| r.outcome.is_failed())
    }

    pub fn succeeded_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, StepOutcome::Succeeded { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == StepOutcome::Skipped)
            .count()
    }

    /// A restart should be scheduled: some step asked for it and nothing failed
    pub fn restart_due(&self) -> bool {
        self.reboot_requested && self.is_success()
    }
}

/// Runs steps against a completion ledger and reports status lines.
pub struct StepRunner<L, R> {
    ledger: L,
    reporter: R,
    ctx: ActionContext,
}

impl<L: CompletionLedger, R: StatusReporter> StepRunner<L, R> {
    pub fn new(ledger: L, reporter: R, ctx: ActionContext) -> Self {
        Self {
            ledger,
            reporter,
            ctx,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn context(&self) -> &ActionContext {
        &self.ctx
    }

    /// Give back the ledger and reporter
    pub fn into_parts(self) -> (L, R) {
        (self.ledger, self.reporter)
    }

    /// Run one step unless its marker is already present.
    pub fn run_step(&mut self, step: &Step) -> StepOutcome {
        match self.ledger.has(&step.marker) {
            Ok(true) => {
                debug!("Marker '{}' present, skipping '{}'", step.marker, step.name);
                self.reporter.report(StatusLine::Skipped {
                    name: step.name.clone(),
                });
                return StepOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => {
                return self.fail(step, format!("cannot check completion marker: {}", e));
            }
        }

        self.reporter.report(StatusLine::Started {
            name: step.name.clone(),
        });
        info!("Running '{}': {}", step.name, step.action.describe());

        let outcome = match step.action.run(&self.ctx) {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(step, format!("{:#}", e)),
        };

        if self.ctx.dry_run {
            debug!("Dry run: marker '{}' not written", step.marker);
        } else if let Err(e) = self.ledger.mark(&step.marker) {
            return self.fail(step, format!("action finished but marker write failed: {}", e));
        }

        if outcome.reboot_required() {
            warn!("'{}' requires a restart to finish", step.name);
        }
        self.reporter.report(StatusLine::Succeeded {
            name: step.name.clone(),
        });
        StepOutcome::Succeeded {
            reboot_required: outcome.reboot_required(),
        }
    }

    fn fail(&mut self, step: &Step, message: String) -> StepOutcome {
        error!("Step '{}' failed: {}", step.name, message);
        self.reporter.report(StatusLine::Failed {
            name: step.name.clone(),
            message: message.clone(),
        });
        StepOutcome::Failed { message }
    }

    /// Run every step in order, applying `policy` after a failure.
    /// No further step starts once an interrupting signal has arrived.
    pub fn run_catalog(&mut self, steps: &[Step], policy: FailurePolicy) -> RunReport {
        self.run_catalog_until(steps, policy, interrupted)
    }

    /// `run_catalog` with the interruption check supplied by the caller
    pub fn run_catalog_until<F>(
        &mut self,
        steps: &[Step],
        policy: FailurePolicy,
        stop_signal: F,
    ) -> RunReport
    where
        F: Fn() -> Option<i32>,
    {
        let mut report = RunReport::default();

        for step in steps {
            if let Some(sig) = stop_signal() {
                warn!("Interrupted by signal {}; not starting '{}'", sig, step.name);
                report.interrupted = Some(sig);
                break;
            }
            let outcome = self.run_step(step);

            if let StepOutcome::Succeeded {
                reboot_required: true,
            } = outcome
            {
                report.reboot_requested = true;
            }
            let failed = outcome.is_failed();
            report.records.push(StepRecord {
                name: step.name.clone(),
                marker: step.marker.clone(),
                outcome,
            });

            if failed && policy == FailurePolicy::Halt {
                info!(
                    "Halting after '{}'; {} step(s) not attempted",
                    step.name,
                    steps.len() - report.records.len()
                );
                report.halted_at = Some(step.name.clone());
                break;
            }
        }

        if report.interrupted.is_none() {
            // A signal during the last step
            report.interrupted = stop_signal();
        }

        info!(
            "Run finished: {} succeeded, {} skipped, {} failed",
            report.succeeded_count(),
            report.skipped_count(),
            report.failures().count()
        );
        report
    }
}
