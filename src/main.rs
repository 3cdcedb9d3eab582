//! logsift - access-log importer and analytics
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use logsift::config::{CliArgs, Command, ImportConfig, QueryCommand, QueryConfig};
use logsift::db::{connect, BackendKind};
use logsift::error::QueryResult;
use logsift::ingest::{ingest_with, ImportProgress, IngestOptions};
use logsift::progress::{print_catalog, print_header, print_summary, print_table, ProgressReporter};
use logsift::query::{get_query, QueryEngine, TableRow, QUERY_CATALOG};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Spinner refresh interval
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    match &args.command {
        Command::Import(import) => {
            let config = ImportConfig::from_args(import, args.quiet, args.verbose)
                .context("Invalid configuration")?;
            run_import(config)
        }
        Command::Query(query) => {
            let config = QueryConfig::from_args(query).context("Invalid configuration")?;
            run_query(config, args.quiet)
        }
        Command::Queries { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(QUERY_CATALOG)?);
            } else {
                print_catalog();
            }
            Ok(())
        }
    }
}

fn run_import(config: ImportConfig) -> Result<()> {
    // Setup signal handler for graceful shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, flushing buffered records...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    if config.show_progress {
        let source_size = std::fs::metadata(&config.input).ok().map(|m| m.len());
        print_header(
            &config.input.display().to_string(),
            source_size,
            config.backend.kind.name(),
            &config.backend.target(),
            config.workers,
        );
    }

    let mut conn = connect(&config.backend, &config.destination)
        .with_context(|| format!("Failed to connect to {}", config.backend.target()))?;

    let progress = Arc::new(ImportProgress::default());
    let options = IngestOptions::default()
        .with_batch_size(config.batch_size)
        .with_workers(config.workers)
        .with_shutdown(shutdown)
        .with_progress(Arc::clone(&progress));

    let reporter = config.show_progress.then(ProgressReporter::new);
    if let Some(ref r) = reporter {
        r.set_status("Importing...");
    }

    // Run the import while a ticker thread refreshes the spinner
    let done = AtomicBool::new(false);
    let result = thread::scope(|scope| {
        if let Some(reporter) = &reporter {
            let progress = &progress;
            let done = &done;
            scope.spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    reporter.update(&progress.snapshot());
                    thread::sleep(PROGRESS_INTERVAL);
                }
            });
        }

        let result = ingest_with(&mut conn, &config.input, &options);
        done.store(true, Ordering::Relaxed);
        result
    });

    let summary = result.context("Import failed")?;

    // Finish progress
    if let Some(ref r) = reporter {
        r.update(&progress.snapshot());
        if summary.completed {
            r.finish("Import completed");
        } else {
            r.finish("Import interrupted");
        }
    }

    if config.show_progress {
        let db_size = match config.backend.kind {
            BackendKind::Relational => std::fs::metadata(&config.backend.sqlite_path).ok().map(|m| m.len()),
            _ => None,
        };
        print_summary(&summary, &config.destination, db_size);
    }

    conn.close().context("Failed to close connection")?;

    // Report success/failure
    if !summary.completed {
        info!("Import was interrupted before completion");
    }

    if summary.records_failed > 0 {
        warn!(failed = summary.records_failed, "Import completed with write failures");
    }

    Ok(())
}

fn run_query(config: QueryConfig, quiet: bool) -> Result<()> {
    let conn = connect(&config.backend, &config.destination)
        .with_context(|| format!("Failed to connect to {}", config.backend.target()))?;

    let mut engine = QueryEngine::new(&conn).context("Queries are unavailable")?;
    if let Some(now) = config.now {
        engine = engine.with_reference_time(now);
    }

    if !quiet && !config.json {
        if let Some(def) = get_query(config.query.query_id()) {
            println!();
            println!("{} ({})", console::style(def.name).cyan().bold(), config.destination);
            println!(
                "{}",
                console::style(format!("reference time {}", engine.reference_time().to_rfc3339())).dim()
            );
            println!();
        }
    }

    let json = config.json;
    match &config.query {
        QueryCommand::TopCombos { limit } => emit(engine.top_ip_user_agent_combos(*limit), json)?,
        QueryCommand::TopUserAgents { limit } => emit(engine.top_user_agents(*limit), json)?,
        QueryCommand::RequestFrequency { minutes } => emit(engine.request_frequency(*minutes), json)?,
        QueryCommand::ServerErrors { prefix, minutes } => {
            emit(engine.server_errors_in_window(prefix, *minutes), json)?
        }
        QueryCommand::ExtremeLatency { limit, shortest } => {
            emit(engine.extreme_latency_queries(*limit, !*shortest), json)?
        }
        QueryCommand::PathDepth { depth, segment, limit } => {
            emit(engine.top_requests_at_path_depth(*limit, *depth, segment), json)?
        }
        QueryCommand::UpstreamCounts => emit(engine.counts_by_upstream_worker(), json)?,
        QueryCommand::ConversionStats { sort } => emit(engine.conversion_statistics(*sort), json)?,
        QueryCommand::RequestsInWindow { seconds } => emit(engine.requests_in_window(*seconds), json)?,
        QueryCommand::BusiestMinutes { limit } => emit(engine.largest_request_periods(*limit), json)?,
    }

    drop(engine);
    conn.close().context("Failed to close connection")?;
    Ok(())
}

/// Print query rows as a table or JSON
fn emit<T: TableRow + Serialize>(rows: QueryResult<Vec<T>>, json: bool) -> Result<()> {
    let rows = rows.context("Query failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_table(&rows);
    }
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("logsift=debug,warn")
    } else {
        EnvFilter::new("logsift=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
