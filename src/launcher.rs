//! Tracked Process Launch
//!
//! `run_process_safe` is the single place where deskstrap starts external
//! programs (installers, helper commands, the restart request). It guarantees:
//!
//! - The child leads its own process group and dies with the provisioner
//! - The child PID is registered with `ChildRegistry` while it runs
//! - stdin is closed, so an installer that unexpectedly prompts fails fast
//!   instead of hanging on input nobody will type
//! - Arguments come from a typed `LaunchArgs` value, never a shell string

use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// How many trailing stderr lines end up in failure messages
const STDERR_TAIL_LINES: usize = 5;

/// Typed description of a process launch.
///
/// # Contract
///
/// - `program()` is a path or a bare name resolved through `PATH`.
/// - `to_cli_args()` returns the arguments exactly as the program expects them.
/// - `get_env_vars()` returns extra environment variables for the child.
pub trait LaunchArgs {
    fn program(&self) -> String;

    fn to_cli_args(&self) -> Vec<String>;

    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Single-line rendering for logs
    fn command_line(&self) -> String {
        let mut parts = vec![self.program()];
        parts.extend(self.to_cli_args());
        parts.join(" ")
    }
}

/// Launch a process, wait for it, and capture its output.
///
/// Returns `Err` only if the process could not be started or waited on; a
/// nonzero exit status is reported through `ProcessOutput`.
pub fn run_process_safe<T: LaunchArgs + ?Sized>(args: &T) -> Result<ProcessOutput> {
    let program = args.program();
    let cli_args = args.to_cli_args();
    let env_vars = args.get_env_vars();

    info!("Launching: {}", args.command_line());
    if !env_vars.is_empty() {
        debug!(
            "Extra environment: {:?}",
            env_vars.iter().map(|(k, _)| k).collect::<Vec<_>>()
        );
    }

    let mut cmd = Command::new(&program);
    cmd.args(&cli_args)
        .envs(env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to start {}", program))?;
    let pid = child.id();

    ChildRegistry::lock_global().register(pid);

    let waited = child.wait_with_output();

    ChildRegistry::lock_global().unregister(pid);

    let output = waited.with_context(|| format!("failed waiting for {}", program))?;

    let result = ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    };

    for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
        debug!("[{}] {}", program, line);
    }
    info!(
        "{} exited with {}",
        program,
        result
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "a signal".to_string())
    );

    Ok(result)
}

/// Output of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// None if the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ProcessOutput {
    /// Last few non-empty stderr lines joined with " | "
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join(" | ")
    }

    /// Error out unless the process exited with status 0
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let tail = self.stderr_tail();
        if tail.is_empty() {
            anyhow::bail!("{} failed (exit code {})", context, code)
        } else {
            anyhow::bail!("{} failed (exit code {}): {}", context, code, tail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sh(&'static str);

    impl LaunchArgs for Sh {
        fn program(&self) -> String {
            "sh".to_string()
        }
        fn to_cli_args(&self) -> Vec<String> {
            vec!["-c".to_string(), self.0.to_string()]
        }
        fn get_env_vars(&self) -> Vec<(String, String)> {
            vec![("DESKSTRAP_TEST".to_string(), "yes".to_string())]
        }
    }

    #[test]
    fn test_captures_stdout_and_exit_code() {
        let out = run_process_safe(&Sh("echo hello; exit 0")).unwrap();
        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_env_vars_reach_child() {
        let out = run_process_safe(&Sh("printf %s \"$DESKSTRAP_TEST\"")).unwrap();
        assert_eq!(out.stdout, "yes");
    }

    #[test]
    fn test_nonzero_exit_is_output_not_error() {
        let out = run_process_safe(&Sh("echo oops >&2; exit 7")).unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(7));
        let err = out.ensure_success("Fonts").unwrap_err();
        assert_eq!(err.to_string(), "Fonts failed (exit code 7): oops");
    }

    #[test]
    fn test_missing_program_is_error() {
        struct Missing;
        impl LaunchArgs for Missing {
            fn program(&self) -> String {
                "/nonexistent/deskstrap-installer".to_string()
            }
            fn to_cli_args(&self) -> Vec<String> {
                vec![]
            }
        }
        let err = run_process_safe(&Missing).unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[test]
    fn test_stdin_is_closed() {
        // `read` hits EOF immediately instead of blocking
        let out = run_process_safe(&Sh("read line; echo done")).unwrap();
        assert_eq!(out.stdout.trim(), "done");
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let out = ProcessOutput {
            stdout: String::new(),
            stderr: "1\n2\n\n3\n4\n5\n6\n".to_string(),
            exit_code: Some(1),
            success: false,
        };
        assert_eq!(out.stderr_tail(), "2 | 3 | 4 | 5 | 6");
    }

    #[test]
    fn test_command_line_rendering() {
        assert_eq!(Sh("exit 0").command_line(), "sh -c exit 0");
    }
}
