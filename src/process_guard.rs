//! Lifecycle management for launched installer processes
//!
//! Installers run for minutes and may spawn helpers of their own. If the
//! provisioner is interrupted (Ctrl+C, SIGTERM, closed SSH session) those
//! processes must not keep running unattended, because the step they belong to
//! will be retried from scratch on the next run.
//!
//! # Approach
//! - Every launched process leads its own process group
//! - Each child gets a parent-death signal (SIGTERM)
//! - Running PIDs are tracked in a global registry
//! - On SIGINT/SIGTERM/SIGHUP or guard drop, every tracked group gets SIGTERM,
//!   then SIGKILL once the grace period is over

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Grace period given to installers when the provisioner is dropped
const DROP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Grace period given to installers on SIGINT/SIGTERM/SIGHUP
const SIGNAL_GRACE_PERIOD: Duration = Duration::from_secs(3);

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Signal number that interrupted the run, 0 while running normally
static INTERRUPTED_BY: AtomicI32 = AtomicI32::new(0);

/// The signal that interrupted the run, if any
pub fn interrupted() -> Option<i32> {
    match INTERRUPTED_BY.load(Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

/// PIDs of launched processes that have not exited yet
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Set once termination started, so signal handler and drop don't race
    cleanup_initiated: bool,
}

impl ChildRegistry {
    fn global_ref() -> &'static Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY.get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
    }

    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        Self::global_ref().clone()
    }

    /// Lock the global registry, recovering it if a panicking thread poisoned it
    pub fn lock_global() -> MutexGuard<'static, ChildRegistry> {
        lock_registry(Self::global_ref())
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Tracking launched process {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Process {} exited, no longer tracked", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Terminate every tracked process group.
    /// SIGTERM first, SIGKILL for whatever is still alive after `grace_period`.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            debug!("Termination already in progress");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        info!("Stopping {} running installer process(es)", pids.len());

        for &pid in &pids {
            if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                warn!("SIGTERM to process group {} failed: {}", pid, e);
                if let Err(e) = send_signal(pid, Signal::SIGTERM) {
                    warn!("SIGTERM to PID {} failed: {}", pid, e);
                }
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                info!("All installer processes stopped");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids {
            if is_process_alive(pid) {
                warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
                if let Err(e) = send_signal_to_group(pid, Signal::SIGKILL) {
                    error!("SIGKILL to process group {} failed: {}", pid, e);
                    let _ = send_signal(pid, Signal::SIGKILL);
                }
            }
        }

        self.pids.clear();
    }
}

/// Tracking must survive a poisoned lock, or installers would outlive an interruption
fn lock_registry(registry: &Mutex<ChildRegistry>) -> MutexGuard<'_, ChildRegistry> {
    registry.lock().unwrap_or_else(|poisoned| {
        warn!("Child registry lock was poisoned; recovering");
        poisoned.into_inner()
    })
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID addresses the whole process group
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Alive means it exists and is neither zombie nor dead
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state letter
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// RAII guard that stops all tracked installers when dropped.
/// Held by the `run` command for the duration of the catalog.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    /// Number of processes currently tracked
    pub fn child_count(&self) -> usize {
        lock_registry(&self.registry).count()
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        lock_registry(&self.registry).terminate_all(DROP_GRACE_PERIOD);
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The handler thread stops tracked installers and exits with `128 + signal`.
/// The step that was running keeps no marker, so the next run retries it.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            warn!("Received {}, interrupting the run", signal_name);
            INTERRUPTED_BY.store(sig, Ordering::SeqCst);

            ChildRegistry::lock_global().terminate_all(SIGNAL_GRACE_PERIOD);
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait putting a `Command` into its own process group
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe functions
        // (setpgid, prctl) between fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                // Child gets SIGTERM if the provisioner dies first
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
