//! File existence verification
//!
//! Resolves every stored path against a base folder and rewrites values
//! whose file is absent to 'File Not Found'. Must run after the rewrite
//! rules: it expects paths already in `DCIM/...` form.
//!
//! Sentinel values are terminal and never re-checked. A value that cannot
//! be checked (permission denied, invalid path) is logged and skipped, not
//! treated as missing.

use crate::config::PipelineConfig;
use crate::db::schema::{count_rows, quote_identifier, validate_table};
use crate::error::{DbError, DbResult, FixerError, Result, Stage};
use crate::pipeline::{is_sentinel, FILE_NOT_FOUND};
use crate::progress::ProgressSink;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Result of checking one stored path
#[derive(Debug)]
pub enum FileCheck {
    /// A regular file exists at the resolved path
    Present,
    /// Nothing at the resolved path, or not a regular file
    Missing,
    /// The check itself failed
    Error(io::Error),
}

/// Check whether `relative` names a regular file under `base`
///
/// Joined with `Path::join`: an absolute stored value replaces `base`, and
/// `..` segments are not confined to it.
pub fn check_file(base: &Path, relative: &str) -> FileCheck {
    let full_path = base.join(relative);
    match std::fs::metadata(&full_path) {
        Ok(meta) if meta.is_file() => FileCheck::Present,
        Ok(_) => FileCheck::Missing,
        Err(e) if e.kind() == io::ErrorKind::NotFound => FileCheck::Missing,
        Err(e) => FileCheck::Error(e),
    }
}

/// Result of a verification pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyOutcome {
    /// Cells visited (rows x columns)
    pub rows_checked: u64,

    /// Cells skipped because they were NULL or already a sentinel
    pub sentinels_skipped: u64,

    /// Cells whose check failed and were left untouched
    pub check_errors: u64,

    /// Rows rewritten to 'File Not Found'
    pub missing_updates: u64,
}

/// Verify every watched column of `table` against `base_folder`
///
/// Progress is reported every `config.progress_interval` cells as
/// `cells_processed / (row_count * columns) * 100`.
pub fn verify_existence(
    conn: &Connection,
    table: &str,
    base_folder: &Path,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
) -> Result<VerifyOutcome> {
    config.validate()?;
    validate_table(conn, table, &config.column_names())?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| stage_error(table, e.into()))?;

    match run_verify(&tx, table, base_folder, config, progress) {
        Ok(outcome) => {
            tx.commit().map_err(|e| stage_error(table, e.into()))?;
            info!(
                missing = outcome.missing_updates,
                errors = outcome.check_errors,
                "File existence check completed on table {}", table
            );
            Ok(outcome)
        }
        Err(e) => {
            error!("Error checking file existence on table {}: {}", table, e);
            if let Err(rollback_err) = tx.rollback() {
                error!("Rollback failed: {}", rollback_err);
            }
            Err(stage_error(table, e))
        }
    }
}

fn run_verify(
    conn: &Connection,
    table: &str,
    base_folder: &Path,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
) -> DbResult<VerifyOutcome> {
    let total_cells = count_rows(conn, table)? * config.columns.len() as u64;
    let interval = config.progress_interval.max(1) as u64;
    let mut outcome = VerifyOutcome::default();

    for column in &config.columns {
        info!("Checking file existence for column {}", column.name);

        let col = quote_identifier(&column.name);
        let table_ident = quote_identifier(table);
        let stored = column_values(conn, &table_ident, &col)?;
        let mut update = conn.prepare_cached(&format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            table_ident, col, col
        ))?;
        // Identical values share one check and one UPDATE
        let mut seen: HashSet<String> = HashSet::new();

        for value in stored {
            outcome.rows_checked += 1;

            match value {
                Some(path) if !is_sentinel(&path) => {
                    if seen.insert(path.clone()) {
                        match check_file(base_folder, &path) {
                            FileCheck::Present => {}
                            FileCheck::Missing => {
                                debug!("File not found: {}", base_folder.join(&path).display());
                                let rows = update.execute(params![FILE_NOT_FOUND, path])?;
                                outcome.missing_updates += rows as u64;
                            }
                            FileCheck::Error(e) => {
                                warn!("Error checking file {}: {}", path, e);
                                outcome.check_errors += 1;
                            }
                        }
                    }
                }
                _ => outcome.sentinels_skipped += 1,
            }

            if total_cells > 0 && outcome.rows_checked % interval == 0 {
                let percent = outcome.rows_checked as f64 / total_cells as f64 * 100.0;
                progress.report(
                    percent,
                    &format!(
                        "Checking files in {}: {}/{}",
                        column.name, outcome.rows_checked, total_cells
                    ),
                );
            }
        }
    }

    progress.report(
        100.0,
        &format!("File check completed: {} missing files", outcome.missing_updates),
    );

    Ok(outcome)
}

/// Read a whole column up front so updates don't race an open cursor
fn column_values(conn: &Connection, table: &str, col: &str) -> DbResult<Vec<Option<String>>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM {}", col, table))?;
    let values = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<Option<String>>, _>>()?;
    Ok(values)
}

fn stage_error(table: &str, source: DbError) -> FixerError {
    FixerError::Stage {
        stage: Stage::Verify,
        table: table.to_string(),
        source,
    }
}
