//! Error types for dcim-fixer
//!
//! This module defines the error hierarchy for:
//! - SQLite store errors (including identifier validation)
//! - Configuration and CLI input errors
//! - Stage failures (a rule or verification pass that was rolled back)
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include the table/column involved
//! - Preserve error chains for debugging

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the dcim-fixer application
#[derive(Error, Debug)]
pub enum FixerError {
    /// Database errors outside of a running stage
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A stage failed and its uncommitted changes were rolled back
    #[error("{stage} failed on table '{table}' (changes rolled back): {source}")]
    Stage {
        stage: Stage,
        table: String,
        #[source]
        source: DbError,
    },
}

impl FixerError {
    /// True when the input was rejected before any store access
    pub fn is_config(&self) -> bool {
        matches!(self, FixerError::Config(_))
    }

    /// The stage that failed, if this is a stage failure
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FixerError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// One full pass over the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Path normalization rules
    Rules,
    /// File existence verification
    Verify,
    /// Read-only statistics gathering
    Statistics,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Rules => "Path fixing",
            Stage::Verify => "File existence check",
            Stage::Statistics => "Statistics gathering",
        };
        f.write_str(name)
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Identifier rejected before interpolation into SQL
    #[error("Invalid SQL identifier '{0}': expected letters, digits and underscores")]
    InvalidIdentifier(String),

    /// Table does not exist in the database
    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    /// Column does not exist in the table
    #[error("Column '{column}' does not exist in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    /// CSV export failed
    #[error("Failed to export '{path}': {reason}")]
    Export { path: PathBuf, reason: String },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File existence check requested without a folder
    #[error("A base folder is required for the file existence check (use --folder or --no-verify)")]
    MissingFolder,

    /// Base folder is not a readable directory
    #[error("Invalid base folder '{path}': {reason}")]
    InvalidFolder { path: PathBuf, reason: String },

    /// Database file could not be used
    #[error("Invalid database '{path}': {reason}")]
    InvalidDatabase { path: PathBuf, reason: String },

    /// Empty column list
    #[error("No watched columns configured")]
    NoColumns,

    /// Empty rule list
    #[error("No rewrite rules configured")]
    NoRules,

    /// Progress interval of zero
    #[error("Invalid progress interval {0}: must be at least 1")]
    InvalidProgressInterval(usize),
}

/// Result type alias for FixerError
pub type Result<T> = std::result::Result<T, FixerError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;
