//! Command dispatch for the `dupelink` binary.
//!
//! The binary drives the same [`JobController`] an embedding service would:
//! it starts a scan job, replays the job's events onto a terminal progress
//! renderer, and optionally hands the results to a link job.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;

use crate::actions::{rollback, LinkResult, RollbackReport};
use crate::cli::{Cli, Commands, OutputFormat, ScanArgs, UndoArgs};
use crate::config::{ScanRequest, Settings};
use crate::duplicates::ScanResults;
use crate::error::ExitCode;
use crate::job::{JobController, JobError, JobId, JobStatus, LinkRequest, MemoryJobStore};
use crate::logging::init_logging;
use crate::progress::{Progress, ProgressEvent};
use crate::scanner::Hasher;
use crate::signal::install_handler;

const EVENT_POLL: Duration = Duration::from_millis(100);

/// Run the parsed command line and return the process exit code.
///
/// # Errors
///
/// Returns an error for invalid settings, failed jobs, or output failures.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    log::debug!("Effective settings: {:?}", settings);

    match cli.command {
        Commands::Config => {
            print!("{}", settings.to_toml().context("Failed to render settings")?);
            Ok(ExitCode::Success)
        }
        Commands::Undo(ref args) => run_undo(args),
        Commands::Scan(ref args) => run_scan(&cli, args, settings),
    }
}

fn run_undo(args: &UndoArgs) -> Result<ExitCode> {
    let report = rollback(&args.log, &Hasher::new())
        .with_context(|| format!("Failed to roll back {}", args.log.display()))?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_rollback(&report),
    }

    Ok(if report.is_complete() {
        ExitCode::Success
    } else {
        ExitCode::PartialSuccess
    })
}

fn print_rollback(report: &RollbackReport) {
    println!("{}", report.summary());
    for skip in &report.skipped {
        println!("  skipped {}: {}", skip.path.display(), skip.reason);
    }
}

fn scan_request(args: &ScanArgs) -> ScanRequest {
    let mut request = ScanRequest::new(args.paths.clone());
    request.ignore_dirs = args.ignore_dirs.clone();
    request.ignore_extensions = args.ignore_extensions.clone();
    request.ignore_patterns = args.ignore_patterns.clone();
    request.min_size = args.min_size;
    request.skip_hidden = args.skip_hidden.then_some(true);
    request.hash_threads = args.threads;
    request.strategy = args.strategy.as_ref().map(ToString::to_string);
    request
}

#[derive(Serialize)]
struct JsonReport<'a> {
    scan: &'a ScanResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<&'a LinkResult>,
}

fn run_scan(cli: &Cli, args: &ScanArgs, mut settings: Settings) -> Result<ExitCode> {
    if args.save_results {
        settings.auto_save_results = true;
    }
    if let Some(threads) = args.threads {
        settings.hash_threads = threads.max(1);
    }
    let json = args.output == OutputFormat::Json;

    let controller = Arc::new(JobController::new(Arc::new(MemoryJobStore::new()), settings));
    let shutdown = install_handler()?;
    let hooked = Arc::clone(&controller);
    shutdown.on_shutdown(move || {
        let cancelled = hooked.cancel_all();
        log::debug!("Cancelled {} job(s)", cancelled);
    });

    let progress = Progress::new(cli.quiet || json, cli.no_color);
    let events = controller.subscribe();

    let scan_id = controller.start_scan(scan_request(args))?;
    let status = follow(&controller, &events, &progress, scan_id)?;
    match status {
        JobStatus::Cancelled => return Ok(ExitCode::Interrupted),
        JobStatus::Error => {
            let reason = controller
                .get_progress(scan_id)
                .last_error
                .unwrap_or_else(|| "unknown error".to_string());
            bail!("Scan failed: {reason}");
        }
        _ => {}
    }

    let results = controller.get_results(scan_id)?;
    let mut code = scan_exit_code(&results);

    if !json {
        print_scan(&results, cli.verbose > 0);
    }

    let mut link_result = None;
    if let Some(kind) = args.link {
        if results.summary.no_duplicates {
            log::info!("Nothing to link");
        } else if confirm(args, kind.label(), results.duplicates.len())? {
            let mut request = LinkRequest::new(kind);
            if let Some(ref selected) = args.sets {
                request = request.with_selection(selected.clone());
            }
            match controller.perform_link(scan_id, request) {
                Ok(link_id) => {
                    follow(&controller, &events, &progress, link_id)?;
                    match controller.get_link_result(link_id) {
                        Ok(result) => {
                            code = code.worst(link_exit_code(&result));
                            if !json {
                                print_link(&result);
                            }
                            link_result = Some(result);
                        }
                        Err(JobError::NoResults { .. }) => {
                            let reason = controller
                                .get_progress(link_id)
                                .last_error
                                .unwrap_or_else(|| "unknown error".to_string());
                            bail!("Link failed: {reason}");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(JobError::NothingToLink) => {
                    if !json {
                        println!("Nothing to link: every selected set is already linked.");
                    }
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            println!("Aborted. No files were changed.");
        }
    }

    if json {
        let report = JsonReport {
            scan: &results,
            link: link_result.as_deref(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(code)
}

/// Replay one job's events onto the renderer until it finishes.
fn follow(
    controller: &JobController,
    events: &Receiver<ProgressEvent>,
    progress: &Progress,
    id: JobId,
) -> Result<JobStatus> {
    loop {
        match events.recv_timeout(EVENT_POLL) {
            Ok(event) if event.job() == id => {
                if matches!(event, ProgressEvent::Finished { .. }) {
                    break;
                }
                event.dispatch(progress);
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                if controller.get_progress(id).status.is_terminal() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(controller.wait(id, None)?)
}

fn confirm(args: &ScanArgs, operation: &str, total_sets: usize) -> Result<bool> {
    if args.yes {
        return Ok(true);
    }
    if !io::stdin().is_terminal() {
        bail!("Refusing to modify files without --yes in non-interactive mode");
    }

    let sets = args.sets.as_ref().map_or(total_sets, Vec::len);
    eprint!(
        "{} duplicates in {} set(s)? An undo log will be written. [y/N] ",
        operation, sets
    );
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn scan_exit_code(results: &ScanResults) -> ExitCode {
    let summary = &results.summary;
    if summary.no_duplicates {
        ExitCode::NoDuplicates
    } else if summary.walk_errors > 0 || summary.hash_errors > 0 {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    }
}

fn link_exit_code(result: &LinkResult) -> ExitCode {
    if !result.deleted_not_linked.is_empty() {
        ExitCode::DataLoss
    } else if result.cancelled {
        ExitCode::Interrupted
    } else if result.is_partial() {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    }
}

fn print_scan(results: &ScanResults, verbose: bool) {
    let summary = &results.summary;
    for warning in &summary.warnings {
        println!("warning: {}: {}", warning.path.display(), warning.message);
    }

    for (index, set) in results.duplicates.iter().enumerate() {
        let linked = if set.already_linked {
            " (already linked)"
        } else {
            ""
        };
        println!(
            "[{}] {} x {}{}",
            index,
            set.len(),
            ByteSize::b(set.size),
            linked
        );
        if verbose {
            println!("    hash {}", set.hash_hex());
        }
        println!("  * {}", set.original.path.display());
        for member in &set.duplicates {
            println!("    {}", member.path.display());
        }
    }

    println!(
        "Scanned {} files ({}) in {:.2}s with strategy '{}'.",
        summary.total_files,
        ByteSize::b(summary.before_size),
        summary.duration,
        summary.strategy
    );
    if summary.walk_errors > 0 || summary.hash_errors > 0 {
        println!(
            "Skipped {} unreadable path(s) and {} unhashable file(s).",
            summary.walk_errors, summary.hash_errors
        );
    }
    println!("{}", summary.action_taken);
}

fn print_link(result: &LinkResult) {
    for action in result.actions.iter().filter(|a| a.error.is_some()) {
        if let Some(ref error) = action.error {
            println!("failed: {}: {}", action.target.display(), error);
        }
    }
    for action in result.actions.iter() {
        if let Some(ref error) = action.verification_error {
            println!("unverified: {}: {}", action.target.display(), error);
        }
    }
    println!("{}", result.summary);
    println!("Space saved: {}", result.space_saved);
    if let Some(ref path) = result.undo_log {
        println!("Undo log: {}", path.display());
    }
}
