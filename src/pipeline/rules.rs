//! Ordered path rewrite rules
//!
//! Each rule is one set-based `UPDATE` over a single column. Rules run
//! column-major: every rule for the first column, then every rule for the
//! next one. Later rules rely on what earlier rules did to the same column
//! (double extensions are already collapsed when the extension rules run).
//!
//! ```text
//! for column in config.columns:
//!     1 NULL / ''            -> 'Link Not Found'
//!     2 a.jpg.png            -> a.jpg
//!     3 qfield_x (no dot)    -> qfield_x.jpeg
//!     4 a.heic, a.jpg.bak    -> a.jpg
//!     5 note (no dot)        -> note.jpg
//!     6 files123.jpg         -> files/123.jpg
//!     7 files/x.jpg          -> DCIM/x.jpg
//! ```
//!
//! The whole pass runs in one transaction: a failing statement rolls back
//! every column already processed.

use crate::config::PipelineConfig;
use crate::db::schema::{quote_identifier, validate_table};
use crate::error::{DbError, DbResult, FixerError, Result, Stage};
use crate::pipeline::{FILE_NOT_FOUND, LINK_NOT_FOUND};
use crate::progress::ProgressSink;
use rusqlite::{named_params, Connection};
use serde::Serialize;
use tracing::{debug, error, info};

/// Extensions recognized by the double-extension rule
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "heic", "tiff", "bmp"];

/// Sentinel guard appended to every rule after the first
const SENTINEL_GUARD: &str = "{col} NOT LIKE :file_not_found AND {col} NOT LIKE :link_not_found";

/// A single path rewrite, in its required position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RewriteRule {
    /// NULL or empty becomes 'Link Not Found'
    EmptyToSentinel,
    /// Two image extensions back to back: drop the trailing one(s)
    CollapseDoubleExtension,
    /// No dot and contains "qfield": append .jpeg
    QfieldMissingExtension,
    /// Extension other than .jpg/.jpeg: replace it, and any image
    /// extensions stacked before it, with .jpg
    NormalizeExtension,
    /// No dot at all: append .jpg
    MissingExtension,
    /// "files"/"DCIM" prefix not followed by '/': insert one
    RepairSeparator,
    /// "files/" prefix becomes "DCIM/"
    RenameFilesDir,
}

impl RewriteRule {
    /// Every rule, in application order
    pub const ALL: [RewriteRule; 7] = [
        RewriteRule::EmptyToSentinel,
        RewriteRule::CollapseDoubleExtension,
        RewriteRule::QfieldMissingExtension,
        RewriteRule::NormalizeExtension,
        RewriteRule::MissingExtension,
        RewriteRule::RepairSeparator,
        RewriteRule::RenameFilesDir,
    ];

    /// 1-based position in the standard order
    pub fn number(self) -> usize {
        match self {
            RewriteRule::EmptyToSentinel => 1,
            RewriteRule::CollapseDoubleExtension => 2,
            RewriteRule::QfieldMissingExtension => 3,
            RewriteRule::NormalizeExtension => 4,
            RewriteRule::MissingExtension => 5,
            RewriteRule::RepairSeparator => 6,
            RewriteRule::RenameFilesDir => 7,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RewriteRule::EmptyToSentinel => "empty value to 'Link Not Found'",
            RewriteRule::CollapseDoubleExtension => "collapse double extension",
            RewriteRule::QfieldMissingExtension => "add .jpeg to qfield image",
            RewriteRule::NormalizeExtension => "replace invalid extension with .jpg",
            RewriteRule::MissingExtension => "add missing .jpg extension",
            RewriteRule::RepairSeparator => "insert '/' after files or DCIM",
            RewriteRule::RenameFilesDir => "rename files/ to DCIM/",
        }
    }

    /// `UPDATE` template with `{table}` and `{col}` placeholders
    fn template(self) -> String {
        let (set, predicate) = match self {
            RewriteRule::EmptyToSentinel => (":link_not_found", "{col} IS NULL OR {col} = ''"),
            RewriteRule::CollapseDoubleExtension => (
                "regexp_replace({col}, :collapse_pattern, '${1}')",
                "{col} REGEXP :double_pattern",
            ),
            RewriteRule::QfieldMissingExtension => (
                "{col} || '.jpeg'",
                "{col} NOT LIKE '%.%' AND {col} LIKE '%qfield%'",
            ),
            RewriteRule::NormalizeExtension => (
                "regexp_replace({col}, :normalize_pattern, '.jpg')",
                "{col} REGEXP '\\.[A-Za-z0-9]+$' AND {col} NOT LIKE '%.jpg' AND {col} NOT LIKE '%.jpeg'",
            ),
            RewriteRule::MissingExtension => ("{col} || '.jpg'", "{col} NOT LIKE '%.%'"),
            RewriteRule::RepairSeparator => (
                "regexp_replace({col}, '(?i)^(files|dcim)', '${1}/')",
                "(({col} LIKE 'files%' AND {col} NOT LIKE 'files/%') \
                 OR ({col} LIKE 'DCIM%' AND {col} NOT LIKE 'DCIM/%'))",
            ),
            RewriteRule::RenameFilesDir => (
                "regexp_replace({col}, '(?i)^files/', 'DCIM/')",
                "{col} LIKE 'files/%'",
            ),
        };

        if self == RewriteRule::EmptyToSentinel {
            format!("UPDATE {{table}} SET {{col}} = {} WHERE {}", set, predicate)
        } else {
            format!(
                "UPDATE {{table}} SET {{col}} = {} WHERE {} AND {}",
                set, predicate, SENTINEL_GUARD
            )
        }
    }

    /// Concrete SQL for one validated table and column
    pub fn sql(self, table: &str, column: &str) -> String {
        self.template()
            .replace("{table}", &quote_identifier(table))
            .replace("{col}", &quote_identifier(column))
    }

    /// Run this rule against one column, returning the number of rows changed
    pub fn execute(self, conn: &Connection, table: &str, column: &str) -> DbResult<u64> {
        let sql = self.sql(table, column);
        let mut stmt = conn.prepare_cached(&sql)?;

        let file_guard = format!("{}%", FILE_NOT_FOUND);
        let link_guard = format!("{}%", LINK_NOT_FOUND);

        let rows = match self {
            RewriteRule::EmptyToSentinel => {
                stmt.execute(named_params! { ":link_not_found": LINK_NOT_FOUND })?
            }
            RewriteRule::CollapseDoubleExtension => stmt.execute(named_params! {
                ":collapse_pattern": collapse_pattern(),
                ":double_pattern": double_extension_pattern(),
                ":file_not_found": file_guard,
                ":link_not_found": link_guard,
            })?,
            RewriteRule::NormalizeExtension => stmt.execute(named_params! {
                ":normalize_pattern": normalize_pattern(),
                ":file_not_found": file_guard,
                ":link_not_found": link_guard,
            })?,
            _ => stmt.execute(named_params! {
                ":file_not_found": file_guard,
                ":link_not_found": link_guard,
            })?,
        };

        Ok(rows as u64)
    }
}

impl std::fmt::Display for RewriteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rule {} ({})", self.number(), self.description())
    }
}

/// Two recognized image extensions at the end of a value
pub fn double_extension_pattern() -> String {
    let ext = IMAGE_EXTENSIONS.join("|");
    format!(r"(?i)\.({ext})\.({ext})$")
}

/// First extension kept, every trailing recognized extension dropped
fn collapse_pattern() -> String {
    let ext = IMAGE_EXTENSIONS.join("|");
    format!(r"(?i)(\.(?:{ext}))(?:\.(?:{ext}))+$")
}

/// Final extension plus any image extensions directly before it
///
/// `a.jpg.bak` must become `a.jpg`, not `a.jpg.jpg`: rule 2 has already
/// run for this column and would not see the new double extension.
fn normalize_pattern() -> String {
    let ext = IMAGE_EXTENSIONS.join("|");
    format!(r"(?i)(?:\.(?:{ext}))*\.[A-Za-z0-9]+$")
}

/// Rows changed by one rule on one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub column: String,
    pub rule: RewriteRule,
    pub rows: u64,
}

/// Result of a full rule pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleOutcome {
    /// Sum of rows changed across every step
    pub total_updates: u64,

    /// One entry per (column, rule), in execution order
    pub steps: Vec<StepOutcome>,
}

impl RuleOutcome {
    /// Rows changed by a rule on a column
    pub fn rows_for(&self, column: &str, rule: RewriteRule) -> u64 {
        self.steps
            .iter()
            .filter(|s| s.column == column && s.rule == rule)
            .map(|s| s.rows)
            .sum()
    }
}

/// Apply every configured rule to every configured column
///
/// Progress is reported after each (column, rule) step as
/// `completed_steps / (columns * rules) * 100`.
pub fn apply_rules(
    conn: &Connection,
    table: &str,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
) -> Result<RuleOutcome> {
    config.validate()?;
    validate_table(conn, table, &config.column_names())?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| stage_error(table, e.into()))?;

    match run_rules(&tx, table, config, progress) {
        Ok(outcome) => {
            tx.commit().map_err(|e| stage_error(table, e.into()))?;
            info!(
                total_updates = outcome.total_updates,
                "All fixing queries completed on table {}", table
            );
            Ok(outcome)
        }
        Err(e) => {
            error!("Error executing fixing queries on table {}: {}", table, e);
            if let Err(rollback_err) = tx.rollback() {
                error!("Rollback failed: {}", rollback_err);
            }
            Err(stage_error(table, e))
        }
    }
}

fn run_rules(
    conn: &Connection,
    table: &str,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
) -> DbResult<RuleOutcome> {
    let total_steps = config.columns.len() * config.rules.len();
    let mut outcome = RuleOutcome::default();
    let mut completed = 0usize;

    for column in &config.columns {
        for &rule in &config.rules {
            info!("Executing {} on column {}", rule, column.name);
            debug!("{}", rule.sql(table, &column.name));

            let rows = rule.execute(conn, table, &column.name)?;
            outcome.total_updates += rows;
            outcome.steps.push(StepOutcome {
                column: column.name.clone(),
                rule,
                rows,
            });
            info!("Completed {} on column {}: {} rows affected", rule, column.name, rows);

            completed += 1;
            let percent = completed as f64 / total_steps as f64 * 100.0;
            progress.report(percent, &format!("Fixing {}: {} updates", column.name, rows));
        }
    }

    Ok(outcome)
}

fn stage_error(table: &str, source: DbError) -> FixerError {
    FixerError::Stage {
        stage: Stage::Rules,
        table: table.to_string(),
        source,
    }
}
