//! Configuration types for dcim-fixer
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The pipeline configuration (watched columns, rule order, row keys)
//! - Validated options for a fix run

use crate::error::ConfigError;
use crate::pipeline::rules::RewriteRule;
use clap::Parser;
use std::path::PathBuf;

/// Default verification progress granularity (rows between reports)
pub const DEFAULT_PROGRESS_INTERVAL: usize = 10;

/// Watched columns of the survey table with their report labels
const DEFAULT_COLUMNS: &[(&str, &str)] = &[
    ("c_pano_av", "Chambre Panoramique Avant"),
    ("syno", "Photo Feuille Manuel"),
    ("pht_mas_a", "Photo Masque A"),
    ("pht_mas_b", "Photo Masque B"),
    ("pht_mas_c", "Photo Masque C"),
    ("pht_mas_d", "Photo Masque D"),
    ("ch_fer_apr", "Chambre Fermeture Apres"),
    ("c_ouv_ap2", "Chambre Ouverte Après Photo"),
    ("c_pano_apr", "Chambre Panoramique Apres"),
    ("pho_fer_av", "Photo Fermeture Avant"),
    ("c_ouv_av_1", "Chambre Ouverte Avant"),
];

/// Columns identifying a row in "which rows are broken" listings
const DEFAULT_ROW_KEY: [&str; 3] = ["id", "id_troncon", "code"];

/// Photo path fixer for field-survey tables
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dcim-fixer",
    version,
    about = "Normalize photo path columns and verify the referenced files exist",
    long_about = "Rewrites malformed photo paths stored in a survey table, marks rows whose \
                  photo is missing on disk, and reports per-column statistics.\n\n\
                  Missing values become 'Link Not Found'; paths with no file behind them \
                  become 'File Not Found'.",
    after_help = "EXAMPLES:\n    \
        dcim-fixer survey.db tables\n    \
        dcim-fixer survey.db fix --table visits --folder /mnt/photos\n    \
        dcim-fixer survey.db fix --table visits --no-verify --report\n    \
        dcim-fixer survey.db report --table visits --json report.json\n    \
        dcim-fixer survey.db export-csv --table visits -o visits.csv"
)]
pub struct CliArgs {
    /// SQLite database holding the survey table
    #[arg(value_name = "DATABASE")]
    pub database: PathBuf,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Directory for the per-run log file
    #[arg(long, default_value = "logs", value_name = "DIR", global = true)]
    pub log_dir: PathBuf,
}

/// Subcommands
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Fix path formatting and check that referenced files exist
    Fix {
        /// Table to fix
        #[arg(short, long, value_name = "TABLE")]
        table: String,

        /// Folder the stored relative paths are resolved against
        #[arg(short, long, value_name = "DIR")]
        folder: Option<PathBuf>,

        /// Skip the path formatting rules
        #[arg(long)]
        no_fix: bool,

        /// Skip the file existence check
        #[arg(long)]
        no_verify: bool,

        /// Print the full report after completion
        #[arg(long)]
        report: bool,

        /// Rows between verification progress updates
        #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL, value_name = "NUM")]
        progress_interval: usize,

        /// Override the watched columns (can be repeated)
        #[arg(long = "column", value_name = "COLUMN", action = clap::ArgAction::Append)]
        columns: Vec<String>,
    },

    /// Show per-column statistics without modifying anything
    Report {
        /// Table to inspect
        #[arg(short, long, value_name = "TABLE")]
        table: String,

        /// Also write the statistics as JSON
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,

        /// Override the watched columns (can be repeated)
        #[arg(long = "column", value_name = "COLUMN", action = clap::ArgAction::Append)]
        columns: Vec<String>,
    },

    /// List the tables in the database
    Tables,

    /// Export a table as CSV
    ExportCsv {
        /// Table to export
        #[arg(short, long, value_name = "TABLE")]
        table: String,

        /// Output CSV file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

/// A text column holding a photo path or a sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedColumn {
    /// Column name in the table
    pub name: String,

    /// Human-readable name used in reports
    pub label: String,
}

impl WatchedColumn {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }

    /// Column whose label is its own name
    pub fn unlabeled(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
        }
    }
}

/// Columns, rules and tuning shared by every stage
///
/// Owned by the caller and passed explicitly into each stage, so tests can
/// run a single column or a re-ordered rule list.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Watched columns, in processing order
    pub columns: Vec<WatchedColumn>,

    /// Rewrite rules, in application order
    pub rules: Vec<RewriteRule>,

    /// Columns identifying a row in listings (id, id_troncon, code)
    pub row_key: [String; 3],

    /// Rows between verification progress reports
    pub progress_interval: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS
                .iter()
                .map(|(name, label)| WatchedColumn::new(*name, *label))
                .collect(),
            rules: RewriteRule::ALL.to_vec(),
            row_key: DEFAULT_ROW_KEY.map(String::from),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl PipelineConfig {
    /// Default configuration restricted to the given column names
    ///
    /// Known columns keep their labels; unknown ones are labeled by name.
    /// An empty list keeps the default columns.
    pub fn with_columns<S: AsRef<str>>(names: &[S]) -> Self {
        let mut config = Self::default();
        if names.is_empty() {
            return config;
        }

        config.columns = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                DEFAULT_COLUMNS
                    .iter()
                    .find(|(known, _)| *known == name)
                    .map(|(known, label)| WatchedColumn::new(*known, *label))
                    .unwrap_or_else(|| WatchedColumn::unlabeled(name))
            })
            .collect();
        config
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.columns.is_empty() {
            return Err(ConfigError::NoColumns);
        }
        if self.rules.is_empty() {
            return Err(ConfigError::NoRules);
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::InvalidProgressInterval(0));
        }
        Ok(())
    }

    /// Column names, in processing order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Report label for a column
    pub fn label_for<'a>(&'a self, column: &'a str) -> &'a str {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.label.as_str())
            .unwrap_or(column)
    }
}

/// Which stages a fix run performs
#[derive(Debug, Clone)]
pub struct FixOptions {
    /// Run the rewrite rules
    pub fix_paths: bool,

    /// Run the existence verifier
    pub check_existence: bool,

    /// Folder the stored paths are resolved against
    pub base_folder: Option<PathBuf>,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            fix_paths: true,
            check_existence: true,
            base_folder: None,
        }
    }
}

impl FixOptions {
    /// Reject options that cannot run, before any store access
    ///
    /// Returns the base folder when the existence check is enabled.
    pub fn validate(&self) -> Result<Option<&PathBuf>, ConfigError> {
        if !self.check_existence {
            return Ok(None);
        }

        let folder = self.base_folder.as_ref().ok_or(ConfigError::MissingFolder)?;
        match std::fs::metadata(folder) {
            Ok(meta) if meta.is_dir() => Ok(Some(folder)),
            Ok(_) => Err(ConfigError::InvalidFolder {
                path: folder.clone(),
                reason: "not a directory".to_string(),
            }),
            Err(e) => Err(ConfigError::InvalidFolder {
                path: folder.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl CliArgs {
    /// Check the database path before opening it
    pub fn validate_database(&self) -> Result<(), ConfigError> {
        if !self.database.is_file() {
            return Err(ConfigError::InvalidDatabase {
                path: self.database.clone(),
                reason: "file does not exist".to_string(),
            });
        }
        Ok(())
    }
}
