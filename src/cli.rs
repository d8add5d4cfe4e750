use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Catalog used when `--catalog` is not given
pub const DEFAULT_CATALOG: &str = "/etc/deskstrap/catalog.json";

/// deskstrap - resumable workstation provisioning
#[derive(Parser, Debug)]
#[command(name = "deskstrap")]
#[command(about = "Run a workstation provisioning catalog, resuming where the last run stopped")]
#[command(version)]
pub struct Cli {
    /// Catalog file describing the steps to run
    #[arg(short, long, global = true, default_value = DEFAULT_CATALOG)]
    pub catalog: PathBuf,

    /// Override `settings.marker_dir` from the catalog
    #[arg(long, global = true)]
    pub marker_dir: Option<PathBuf>,

    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Actions log what they would do, no markers are written and no
    /// restart is scheduled. Completed steps are still reported as skipped.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run every pending step of the catalog (the default)
    Run {
        /// Record failures and keep going instead of halting at the first one
        #[arg(long)]
        keep_going: bool,
        /// Never run the restart command, even if a step asked for a reboot
        #[arg(long)]
        no_restart: bool,
        /// Skip the pre-flight environment checks
        #[arg(long)]
        skip_preflight: bool,
        /// Do not write a transcript file
        #[arg(long)]
        no_transcript: bool,
    },
    /// Show which steps are completed and which are pending
    Status,
    /// Check the catalog for mistakes without running anything
    Validate,
    /// Remove completion markers so the steps run again
    Reset {
        /// Marker keys to remove
        #[arg(required_unless_present = "all")]
        markers: Vec<String>,
        /// Remove every marker in the marker directory
        #[arg(long, conflicts_with = "markers")]
        all: bool,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run {
            keep_going: false,
            no_restart: false,
            skip_preflight: false,
            no_transcript: false,
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
