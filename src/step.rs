//! Catalog steps and the action contract.
//!
//! A step is a display name, a completion marker and an action. Actions are
//! opaque to the runner: they either finish (optionally asking for a reboot)
//! or fail with an error chain.

use crate::ledger::MarkerKey;
use std::fmt;
use std::path::PathBuf;

/// Result of an action that finished without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionOutcome {
    #[default]
    Completed,
    /// Finished, but the machine must restart for the change to take effect
    RebootRequired,
}

impl ActionOutcome {
    pub fn reboot_required(self) -> bool {
        matches!(self, Self::RebootRequired)
    }
}

/// Run-wide settings every action can see.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Log instead of acting
    pub dry_run: bool,
    /// Where downloaded installers are placed before launch
    pub staging_dir: PathBuf,
    /// Program used to launch `.msi` packages
    pub msiexec: String,
}

impl Default for ActionContext {
    fn default() -> Self {
        Self {
            dry_run: false,
            staging_dir: std::env::temp_dir().join("deskstrap"),
            msiexec: "msiexec".to_string(),
        }
    }
}

/// A side-effecting unit of work.
///
/// # Contract
///
/// - `run()` blocks until the external operation is finished.
/// - Any error means the step did not complete; the runner will not write the
///   marker and will not classify the error.
/// - When `ctx.dry_run` is set, implementations log what they would do and
///   return `Ok(ActionOutcome::Completed)` without side effects.
pub trait StepAction {
    fn run(&self, ctx: &ActionContext) -> anyhow::Result<ActionOutcome>;

    /// Short description for logs and `status` output.
    fn describe(&self) -> String {
        "custom action".to_string()
    }
}

impl<F> StepAction for F
where
    F: Fn(&ActionContext) -> anyhow::Result<ActionOutcome>,
{
    fn run(&self, ctx: &ActionContext) -> anyhow::Result<ActionOutcome> {
        self(ctx)
    }
}

/// One entry of the catalog.
pub struct Step {
    pub name: String,
    pub marker: MarkerKey,
    pub action: Box<dyn StepAction>,
}

impl Step {
    pub fn new(name: impl Into<String>, marker: MarkerKey, action: impl StepAction + 'static) -> Self {
        Self {
            name: name.into(),
            marker,
            action: Box::new(action),
        }
    }

    /// Build a step from a closure
    pub fn from_fn<F>(name: impl Into<String>, marker: MarkerKey, f: F) -> Self
    where
        F: Fn(&ActionContext) -> anyhow::Result<ActionOutcome> + 'static,
    {
        Self::new(name, marker, f)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("marker", &self.marker)
            .field("action", &self.action.describe())
            .finish()
    }
}
