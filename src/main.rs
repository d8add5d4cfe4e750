//! deskstrap - Main entry point
//!
//! Loads the catalog, sets up logging and signal handling, then dispatches
//! to the requested command.

use anyhow::Context;
use deskstrap::cli::{Cli, Commands};
use deskstrap::logging::init_logging;
use deskstrap::provision::{orphan_markers, reset_markers, run_provisioning, step_statuses, RunOptions};
use deskstrap::{
    process_guard, Catalog, ConsoleReporter, DirLedger, FailurePolicy, LaunchArgs, ProcessGuard,
    RestartDecision,
};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    let command = cli.command.clone().unwrap_or_default();

    match dispatch(&cli, command) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Install logging, falling back to console-only if the transcript cannot be opened
fn setup_logging(transcript_dir: Option<&std::path::Path>) {
    match init_logging(transcript_dir) {
        Ok(Some(path)) => info!("Transcript: {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            let _ = init_logging(None);
            warn!("Transcript disabled: {}", e);
        }
    }
}

/// Load the catalog and apply command-line overrides
fn load_catalog(cli: &Cli) -> anyhow::Result<Catalog> {
    let mut catalog = Catalog::load_from_file(&cli.catalog)
        .with_context(|| format!("Failed to load catalog {}", cli.catalog.display()))?;
    if let Some(dir) = &cli.marker_dir {
        catalog.settings.marker_dir = dir.clone();
    }
    debug!("Catalog loaded: {} step(s)", catalog.steps.len());
    Ok(catalog)
}

fn dispatch(cli: &Cli, command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            keep_going,
            no_restart,
            skip_preflight,
            no_transcript,
        } => {
            let catalog = load_catalog(cli)?;
            // Logging before the signal thread exists so the local offset is readable
            if no_transcript || cli.dry_run {
                setup_logging(None);
            } else {
                setup_logging(Some(&catalog.settings.transcript_dir));
            }
            if let Err(e) = process_guard::init_signal_handlers() {
                // Cleanup still happens through ProcessGuard's Drop
                warn!("Failed to initialize signal handlers: {}", e);
            }

            let opts = RunOptions {
                dry_run: cli.dry_run,
                policy: if keep_going {
                    FailurePolicy::Continue
                } else {
                    FailurePolicy::Halt
                },
                no_restart,
                skip_preflight,
            };
            let code = run(&catalog, opts);
            if let Some(sig) = process_guard::interrupted() {
                // The signal thread exits with this code too; whichever is first wins
                return Ok(ExitCode::from((128 + sig) as u8));
            }
            code
        }
        Commands::Status => {
            setup_logging(None);
            let catalog = load_catalog(cli)?;
            status(&catalog)
        }
        Commands::Validate => {
            setup_logging(None);
            let catalog = load_catalog(cli)?;
            match catalog.validate() {
                Ok(()) => {
                    println!(
                        "✓ Catalog is valid: {} step(s) in {}",
                        catalog.steps.len(),
                        cli.catalog.display()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("✗ Catalog validation failed: {}", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Reset { markers, all } => {
            setup_logging(None);
            let catalog = load_catalog(cli)?;
            let mut ledger = DirLedger::at(&catalog.settings.marker_dir);
            let results = reset_markers(&catalog, &mut ledger, &markers, all, cli.dry_run)?;
            if results.is_empty() {
                println!("No markers to reset in {}", ledger.root().display());
            }
            for (key, present) in results {
                match (present, cli.dry_run) {
                    (true, true) => println!("would reset {}", key),
                    (true, false) => println!("reset {}", key),
                    (false, _) => println!("{} was not set", key),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(catalog: &Catalog, opts: RunOptions) -> anyhow::Result<ExitCode> {
    // Installers still running when this returns get terminated
    let _guard = ProcessGuard::new();
    let mut reporter = ConsoleReporter::new();
    let summary = if opts.dry_run {
        let mut ledger = DirLedger::at(&catalog.settings.marker_dir);
        run_provisioning(catalog, &mut ledger, &mut reporter, opts)?
    } else {
        let mut ledger = DirLedger::open(&catalog.settings.marker_dir)?;
        run_provisioning(catalog, &mut ledger, &mut reporter, opts)?
    };

    match summary.restart {
        RestartDecision::Scheduled => println!(
            "Restart scheduled: {}",
            catalog.settings.restart.command_line()
        ),
        RestartDecision::Suppressed => {
            println!("A restart is required to finish provisioning.")
        }
        RestartDecision::NotNeeded | RestartDecision::Withheld => {}
    }

    let report = &summary.report;
    if report.is_success() {
        println!(
            "Provisioning complete: {} step(s) run, {} already done.",
            report.succeeded_count(),
            report.skipped_count()
        );
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(sig) = report.interrupted {
        eprintln!(
            "Provisioning interrupted by signal {}. Run deskstrap again to resume.",
            sig
        );
        return Ok(ExitCode::FAILURE);
    }
    match &report.halted_at {
        Some(name) => eprintln!(
            "Provisioning stopped at '{}'. Fix the problem and run deskstrap again; completed steps will be skipped.",
            name
        ),
        None => {
            let failed: Vec<&str> = report.failures().map(|r| r.name.as_str()).collect();
            eprintln!("Provisioning finished with failures: {}", failed.join(", "));
        }
    }
    Ok(ExitCode::FAILURE)
}

fn status(catalog: &Catalog) -> anyhow::Result<ExitCode> {
    let ledger = DirLedger::at(&catalog.settings.marker_dir);
    let statuses = step_statuses(catalog, &ledger)?;
    let done = statuses.iter().filter(|s| s.completed).count();

    for s in &statuses {
        let mark = if s.completed { "✓" } else { "·" };
        println!("{} {:<32} {:<24} {}", mark, s.name, s.marker, s.action);
    }
    println!("{} of {} step(s) completed", done, statuses.len());

    let orphans = orphan_markers(catalog, &ledger)?;
    if !orphans.is_empty() {
        let names: Vec<&str> = orphans.iter().map(|k| k.as_str()).collect();
        println!("Markers not used by the catalog: {}", names.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}
