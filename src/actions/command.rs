//! Generic program launch for steps that are not installers
//! (registering fonts, refreshing caches, vendor configuration tools).

use crate::launcher::{run_process_safe, LaunchArgs};
use crate::step::{ActionContext, ActionOutcome, StepAction};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl RunCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.program.trim().is_empty() {
            return Err("program is empty".to_string());
        }
        Ok(())
    }
}

impl LaunchArgs for RunCommand {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl StepAction for RunCommand {
    fn run(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        if ctx.dry_run {
            info!("[dry-run] would run: {}", self.command_line());
            return Ok(ActionOutcome::Completed);
        }
        run_process_safe(self)?.ensure_success(&self.program)?;
        Ok(ActionOutcome::Completed)
    }

    fn describe(&self) -> String {
        format!("run {}", self.command_line())
    }
}
