//! dcim-fixer - Photo Path Normalizer for Field-Survey Tables
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use dcim_fixer::config::{CliArgs, Command, FixOptions, PipelineConfig};
use dcim_fixer::db::{export_table_csv, list_tables, open_database};
use dcim_fixer::pipeline::Pipeline;
use dcim_fixer::progress::{
    format_number, print_header, print_report, print_summary, NoProgress, ProgressReporter,
};
use rusqlite::Connection;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

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
    let log_path = setup_logging(args.verbose, &args.log_dir)?;

    args.validate_database().context("Invalid configuration")?;

    match &args.command {
        Command::Fix {
            table,
            folder,
            no_fix,
            no_verify,
            report,
            progress_interval,
            columns,
        } => {
            let mut config = PipelineConfig::with_columns(columns);
            config.progress_interval = *progress_interval;

            let options = FixOptions {
                fix_paths: !no_fix,
                check_existence: !no_verify,
                base_folder: folder.clone(),
            };

            // Reject bad options before the database is opened
            options.validate().context("Invalid configuration")?;

            run_fix(&args, table, config, &options, *report, &log_path)
        }
        Command::Report { table, json, columns } => {
            let config = PipelineConfig::with_columns(columns);
            run_report(&args, table, config, json.as_deref())
        }
        Command::Tables => run_tables(&args),
        Command::ExportCsv { table, output } => run_export(&args, table, output),
    }
}

fn open(args: &CliArgs) -> Result<Connection> {
    open_database(&args.database)
        .with_context(|| format!("Failed to open database {}", args.database.display()))
}

/// Run the fix stages, then optionally print the report
fn run_fix(
    args: &CliArgs,
    table: &str,
    config: PipelineConfig,
    options: &FixOptions,
    show_report: bool,
    log_path: &Path,
) -> Result<()> {
    let conn = open(args)?;
    let pipeline = Pipeline::new(&conn, table, config);

    // Print header
    if !args.quiet {
        let folder = options
            .base_folder
            .as_ref()
            .filter(|_| options.check_existence)
            .map(|f| f.display().to_string());
        print_header(
            &args.database.display().to_string(),
            table,
            folder.as_deref(),
        );
    }

    // A running stage always finishes; the flag is checked between stages
    let shutdown_flag = pipeline.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, stopping after the current stage...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    // Create progress reporter
    let mut progress = if args.quiet {
        None
    } else {
        Some(ProgressReporter::new())
    };

    if let Some(ref p) = progress {
        p.set_status("Starting operations...");
    }

    let result = match progress.as_mut() {
        Some(p) => pipeline.run(options, p),
        None => pipeline.run(options, &mut NoProgress),
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(ref p) = progress {
                p.abandon("Failed");
            }
            return Err(e).context("Fix failed");
        }
    };

    // Finish progress
    if let Some(ref p) = progress {
        if outcome.completed {
            p.finish("All operations completed");
        } else {
            p.finish("Interrupted");
        }
    }

    info!(
        format_updates = outcome.format_updates,
        missing_updates = outcome.missing_updates,
        "Total updates: {}",
        outcome.total_updates()
    );

    if !args.quiet {
        print_summary(
            outcome.format_updates,
            outcome.missing_updates,
            outcome.duration,
            &log_path.display().to_string(),
        );
    }

    if !outcome.completed {
        warn!("Run was interrupted before completion");
        return Ok(());
    }

    if show_report {
        let report = pipeline.statistics().context("Failed to gather statistics")?;
        print_report(&report);
    }

    Ok(())
}

/// Print statistics without modifying the table
fn run_report(args: &CliArgs, table: &str, config: PipelineConfig, json: Option<&Path>) -> Result<()> {
    let conn = open(args)?;
    let pipeline = Pipeline::new(&conn, table, config);

    let progress = if args.quiet {
        None
    } else {
        Some(ProgressReporter::new())
    };

    if let Some(ref p) = progress {
        p.set_status("Gathering statistics...");
    }

    let report = pipeline.statistics().context("Failed to gather statistics")?;

    if let Some(ref p) = progress {
        p.finish("Statistics gathered");
    }

    if !args.quiet {
        print_report(&report);
    }

    if let Some(path) = json {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Statistics written to {}", path.display());
    }

    info!(
        file_not_found = report.total_file_not_found(),
        link_not_found = report.total_link_not_found(),
        "Report completed for table {}", table
    );

    Ok(())
}

fn run_tables(args: &CliArgs) -> Result<()> {
    let conn = open(args)?;
    let tables = list_tables(&conn).context("Failed to list tables")?;

    if tables.is_empty() {
        bail!("No tables found in {}", args.database.display());
    }

    for table in tables {
        println!("{}", table);
    }
    Ok(())
}

fn run_export(args: &CliArgs, table: &str, output: &Path) -> Result<()> {
    let conn = open(args)?;
    let rows = export_table_csv(&conn, table, output)
        .with_context(|| format!("Failed to export table {}", table))?;

    if !args.quiet {
        println!(
            "Exported {} rows from {} to {}",
            format_number(rows),
            table,
            output.display()
        );
    }
    Ok(())
}

/// Log to stderr and to a per-run file under `log_dir`
///
/// Returns the path of the log file.
fn setup_logging(verbose: bool, log_dir: &Path) -> Result<PathBuf> {
    let filter = if verbose {
        EnvFilter::new("dcim_fixer=debug,warn")
    } else {
        EnvFilter::new("dcim_fixer=info,warn")
    };

    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let log_path = log_dir.join(format!(
        "dcim_fixer_{}.log",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let log_file = File::create(&log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

    // Keep the terminal readable under the progress bar
    let stderr_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_filter(stderr_level),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    Ok(log_path)
}
