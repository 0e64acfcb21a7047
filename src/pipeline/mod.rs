//! Path normalization and existence verification pipeline
//!
//! A fix run is a sequence of stages over one table, each committing
//! before the next one reads:
//!
//! ```text
//!   FixOptions ──validate──► rules ──commit──► verify ──commit──► stats
//!                (no store     │                 │                (read-only)
//!                 access on    │ 10% .. 50%      │ 50% .. 90%
//!                 failure)     ▼                 ▼
//!                          ProgressSink ◄────────┘
//! ```
//!
//! A failed stage rolls back its own changes and aborts the remaining
//! stages; stages that already committed stay committed.

pub mod rules;
pub mod stats;
pub mod verify;

use crate::config::{FixOptions, PipelineConfig};
use crate::db::schema::validate_table;
use crate::error::Result;
use crate::progress::{ProgressSink, ScaledProgress};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub use rules::{apply_rules, RewriteRule, RuleOutcome};
pub use stats::{gather_statistics, ColumnStats, RowRef, StatsReport};
pub use verify::{check_file, verify_existence, FileCheck, VerifyOutcome};

/// Marks a path whose file is absent from the photo folder
pub const FILE_NOT_FOUND: &str = "File Not Found";

/// Marks a column that held no path at all
pub const LINK_NOT_FOUND: &str = "Link Not Found";

/// True for values in a terminal sentinel state
///
/// ASCII case-insensitive prefix match, the same test the SQL guards make
/// with `LIKE`, so legacy values such as `Link Not Found.jpg` or
/// `link not found` count too.
pub fn is_sentinel(value: &str) -> bool {
    has_prefix_ignore_case(value, FILE_NOT_FOUND) || has_prefix_ignore_case(value, LINK_NOT_FOUND)
}

fn has_prefix_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Result of a fix run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineOutcome {
    /// Rows changed by the rewrite rules
    pub format_updates: u64,

    /// Rows rewritten to 'File Not Found'
    pub missing_updates: u64,

    /// Per-step rule results (empty when rules were skipped)
    pub rules: Option<RuleOutcome>,

    /// Verification details (None when verification was skipped)
    pub verify: Option<VerifyOutcome>,

    /// Wall-clock time of the run
    pub duration: Duration,

    /// False when interrupted between stages
    pub completed: bool,
}

impl PipelineOutcome {
    pub fn total_updates(&self) -> u64 {
        self.format_updates + self.missing_updates
    }
}

/// Runs the fix stages against one table over a caller-owned connection
pub struct Pipeline<'c> {
    conn: &'c Connection,
    table: String,
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl<'c> Pipeline<'c> {
    pub fn new(conn: &'c Connection, table: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            conn,
            table: table.into(),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between stages; a running stage is never cancelled
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run the selected stages in order
    ///
    /// Options and configuration are validated before the store is touched.
    pub fn run(&self, options: &FixOptions, progress: &mut dyn ProgressSink) -> Result<PipelineOutcome> {
        let start = Instant::now();
        let base_folder = options.validate()?.cloned();
        self.config.validate()?;
        validate_table(self.conn, &self.table, &self.config.column_names())?;

        info!("Starting data fixing operations on table: {}", self.table);
        progress.report(0.0, "Starting operations...");

        let mut outcome = PipelineOutcome::default();

        if options.fix_paths {
            info!("Starting path format fixing...");
            progress.report(10.0, "Fixing path formats...");

            let rules = {
                let mut scaled = ScaledProgress::new(progress, 10.0, 40.0);
                apply_rules(self.conn, &self.table, &self.config, &mut scaled)?
            };

            outcome.format_updates = rules.total_updates;
            outcome.rules = Some(rules);
            info!("Path fixing completed: {} updates made", outcome.format_updates);
            progress.report(
                50.0,
                &format!("Path fixing completed: {} updates", outcome.format_updates),
            );
        }

        if let Some(folder) = base_folder {
            if self.is_interrupted() {
                return Ok(self.finish(outcome, start, false));
            }

            info!("Starting file existence check in {}", folder.display());
            progress.report(50.0, "Checking file existence...");

            let verify = {
                let mut scaled = ScaledProgress::new(progress, 50.0, 40.0);
                verify_existence(self.conn, &self.table, &folder, &self.config, &mut scaled)?
            };

            outcome.missing_updates = verify.missing_updates;
            outcome.verify = Some(verify);
            info!(
                "File existence check completed: {} files not found",
                outcome.missing_updates
            );
            progress.report(
                90.0,
                &format!("File check completed: {} missing files", outcome.missing_updates),
            );
        }

        progress.report(100.0, "All operations completed successfully!");
        Ok(self.finish(outcome, start, true))
    }

    /// Gather the per-column statistics for the current table state
    pub fn statistics(&self) -> Result<StatsReport> {
        gather_statistics(self.conn, &self.table, &self.config)
    }

    fn is_interrupted(&self) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            warn!("Interrupted: skipping remaining stages");
            true
        } else {
            false
        }
    }

    fn finish(&self, mut outcome: PipelineOutcome, start: Instant, completed: bool) -> PipelineOutcome {
        outcome.duration = start.elapsed();
        outcome.completed = completed;
        info!(
            format_updates = outcome.format_updates,
            missing_updates = outcome.missing_updates,
            total = outcome.total_updates(),
            completed,
            "Fix run finished on table {}", self.table
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchedColumn;
    use crate::db::schema::open_in_memory;
    use crate::error::{ConfigError, FixerError};
    use crate::progress::NoProgress;
    use std::fs;
    use tempfile::tempdir;

    fn survey_db() -> Connection {
        let conn = open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE survey (id INTEGER PRIMARY KEY, syno TEXT);
             INSERT INTO survey (syno) VALUES ('files1.jpg');
             INSERT INTO survey (syno) VALUES ('files/2');
             INSERT INTO survey (syno) VALUES (NULL);",
        )
        .unwrap();
        conn
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            columns: vec![WatchedColumn::unlabeled("syno")],
            ..PipelineConfig::default()
        }
    }

    fn values(conn: &Connection) -> Vec<Option<String>> {
        let mut stmt = conn.prepare("SELECT syno FROM survey ORDER BY id").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_is_sentinel() {
        assert!(is_sentinel(FILE_NOT_FOUND));
        assert!(is_sentinel(LINK_NOT_FOUND));
        assert!(is_sentinel("Link Not Found.jpg"));
        assert!(is_sentinel("link not found"));
        assert!(is_sentinel("FILE NOT FOUND"));
        assert!(!is_sentinel("DCIM/File Not Found.jpg"));
        assert!(!is_sentinel("Link"));
        // Multi-byte text shorter than a sentinel must not panic
        assert!(!is_sentinel("é"));
        assert!(!is_sentinel("ééééééééé_é"));
    }

    #[test]
    fn test_missing_folder_rejected_before_store_access() {
        let conn = survey_db();
        let pipeline = Pipeline::new(&conn, "survey", config());

        let err = pipeline.run(&FixOptions::default(), &mut NoProgress).unwrap_err();
        assert!(matches!(err, FixerError::Config(ConfigError::MissingFolder)));
        assert_eq!(values(&conn)[0].as_deref(), Some("files1.jpg"));
    }

    #[test]
    fn test_full_run() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("DCIM")).unwrap();
        fs::write(dir.path().join("DCIM/1.jpg"), b"jpeg").unwrap();

        let conn = survey_db();
        let pipeline = Pipeline::new(&conn, "survey", config());
        let options = FixOptions {
            base_folder: Some(dir.path().to_path_buf()),
            ..FixOptions::default()
        };

        let mut seen = Vec::new();
        let mut sink = |p: f64, _m: &str| seen.push(p);
        let outcome = pipeline.run(&options, &mut sink).unwrap();

        assert!(outcome.completed);
        assert_eq!(outcome.missing_updates, 1);
        assert_eq!(
            values(&conn),
            vec![
                Some("DCIM/1.jpg".to_string()),
                Some(FILE_NOT_FOUND.to_string()),
                Some(LINK_NOT_FOUND.to_string()),
            ]
        );
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&100.0));
        assert!(seen.iter().all(|p| (0.0..=100.0).contains(p)));
    }

    #[test]
    fn test_interrupt_skips_verification() {
        let dir = tempdir().unwrap();
        let conn = survey_db();
        let pipeline = Pipeline::new(&conn, "survey", config());
        pipeline.shutdown_flag().store(true, Ordering::SeqCst);

        let options = FixOptions {
            base_folder: Some(dir.path().to_path_buf()),
            ..FixOptions::default()
        };
        let outcome = pipeline.run(&options, &mut NoProgress).unwrap();

        assert!(!outcome.completed);
        assert!(outcome.format_updates > 0);
        assert!(outcome.verify.is_none());
        assert_eq!(values(&conn)[1].as_deref(), Some("DCIM/2.jpg"));
    }

    #[test]
    fn test_rules_only() {
        let conn = survey_db();
        let pipeline = Pipeline::new(&conn, "survey", config());
        let options = FixOptions {
            check_existence: false,
            ..FixOptions::default()
        };

        let outcome = pipeline.run(&options, &mut NoProgress).unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.missing_updates, 0);
        assert_eq!(outcome.total_updates(), outcome.format_updates);
    }
}
