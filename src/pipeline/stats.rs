//! Per-column statistics for reports
//!
//! Read-only. Runs a fixed battery of aggregate queries for every watched
//! column inside one read transaction so all counts see the same state.

use crate::config::PipelineConfig;
use crate::db::schema::{quote_identifier, validate_table};
use crate::error::{DbError, DbResult, FixerError, Result, Stage};
use crate::pipeline::rules::double_extension_pattern;
use crate::pipeline::{FILE_NOT_FOUND, LINK_NOT_FOUND};
use rusqlite::{named_params, Connection};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Excludes sentinel values from the path-shape counts
const NOT_SENTINEL: &str = "{col} NOT LIKE :file_not_found AND {col} NOT LIKE :link_not_found";

/// Row identification for "which rows are broken" listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRef {
    pub id: Option<String>,
    pub id_troncon: Option<String>,
    pub code: Option<String>,
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "ID: {}, ID Tronc: {}, Code: {}",
            show(&self.id),
            show(&self.id_troncon),
            show(&self.code)
        )
    }
}

/// Statistics for one watched column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub label: String,

    /// Non-null values
    pub total_count: u64,
    /// NULL or empty values
    pub empty_or_null_count: u64,
    /// Non-empty, non-sentinel values with no '/'
    pub no_slash_count: u64,

    pub jpg_count: u64,
    pub jpeg_count: u64,
    /// Non-sentinel values with a '.' not ending in .jpg/.jpeg
    pub other_extension_count: u64,
    /// Non-empty, non-sentinel values with no '.'
    pub missing_extension_count: u64,

    pub double_extension_count: u64,
    /// Values still under `files/`
    pub wrong_path_count: u64,

    pub file_not_found_count: u64,
    pub link_not_found_count: u64,

    pub file_not_found_rows: Vec<RowRef>,
    pub link_not_found_rows: Vec<RowRef>,
}

impl ColumnStats {
    /// Non-sentinel values ending in .jpg or .jpeg
    pub fn valid_count(&self) -> u64 {
        self.jpg_count + self.jpeg_count
    }

    /// Non-sentinel values that are not well-formed photo paths
    pub fn malformed_count(&self) -> u64 {
        self.other_extension_count + self.missing_extension_count
    }
}

/// Statistics for every watched column, in configured order
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsReport {
    pub table: String,
    pub columns: Vec<ColumnStats>,
}

impl StatsReport {
    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.columns.iter().find(|c| c.column == name)
    }

    pub fn total_file_not_found(&self) -> u64 {
        self.columns.iter().map(|c| c.file_not_found_count).sum()
    }

    pub fn total_link_not_found(&self) -> u64 {
        self.columns.iter().map(|c| c.link_not_found_count).sum()
    }
}

/// Gather statistics for every configured column
pub fn gather_statistics(conn: &Connection, table: &str, config: &PipelineConfig) -> Result<StatsReport> {
    config.validate()?;
    let mut identifiers = config.column_names();
    identifiers.extend(config.row_key.iter().map(String::as_str));
    validate_table(conn, table, &identifiers)?;

    let tx = conn.unchecked_transaction().map_err(|e| stage_error(table, e.into()))?;

    let mut report = StatsReport {
        table: table.to_string(),
        columns: Vec::with_capacity(config.columns.len()),
    };

    for column in &config.columns {
        debug!("Gathering statistics for column {}", column.name);
        let mut stats = column_stats(&tx, table, &column.name, config).map_err(|e| stage_error(table, e))?;
        stats.label = column.label.clone();
        report.columns.push(stats);
    }

    // Read-only: nothing to commit
    drop(tx);

    info!(
        columns = report.columns.len(),
        file_not_found = report.total_file_not_found(),
        link_not_found = report.total_link_not_found(),
        "Statistics gathered for table {}", table
    );

    Ok(report)
}

fn column_stats(conn: &Connection, table: &str, column: &str, config: &PipelineConfig) -> DbResult<ColumnStats> {
    let q = QueryBuilder::new(table, column);
    let not_sentinel = NOT_SENTINEL;

    let mut stats = ColumnStats {
        column: column.to_string(),
        ..ColumnStats::default()
    };

    stats.total_count = q.count(conn, "COUNT({col})", "1")?;
    stats.empty_or_null_count = q.count(conn, "COUNT(*)", "{col} IS NULL OR {col} = ''")?;
    stats.no_slash_count = q.count(
        conn,
        "COUNT({col})",
        &format!("{{col}} NOT LIKE '%/%' AND {{col}} <> '' AND {}", not_sentinel),
    )?;
    stats.jpg_count = q.count(conn, "COUNT({col})", &format!("{{col}} LIKE '%.jpg' AND {}", not_sentinel))?;
    stats.jpeg_count = q.count(conn, "COUNT({col})", &format!("{{col}} LIKE '%.jpeg' AND {}", not_sentinel))?;
    stats.other_extension_count = q.count(
        conn,
        "COUNT({col})",
        &format!(
            "{{col}} NOT LIKE '%.jpg' AND {{col}} NOT LIKE '%.jpeg' AND {{col}} LIKE '%.%' AND {}",
            not_sentinel
        ),
    )?;
    stats.missing_extension_count = q.count(
        conn,
        "COUNT({col})",
        &format!("{{col}} NOT LIKE '%.%' AND {{col}} <> '' AND {}", not_sentinel),
    )?;
    stats.double_extension_count = q.count_regex(conn, &double_extension_pattern())?;
    stats.wrong_path_count = q.count(conn, "COUNT({col})", "{col} LIKE 'files/%'")?;
    stats.file_not_found_count = q.count_prefix(conn, FILE_NOT_FOUND)?;
    stats.link_not_found_count = q.count_prefix(conn, LINK_NOT_FOUND)?;
    stats.file_not_found_rows = q.rows_with_prefix(conn, &config.row_key, FILE_NOT_FOUND)?;
    stats.link_not_found_rows = q.rows_with_prefix(conn, &config.row_key, LINK_NOT_FOUND)?;

    Ok(stats)
}

/// Builds the per-column queries for one validated table/column pair
struct QueryBuilder {
    table: String,
    col: String,
}

impl QueryBuilder {
    fn new(table: &str, column: &str) -> Self {
        Self {
            table: quote_identifier(table),
            col: quote_identifier(column),
        }
    }

    fn sql(&self, select: &str, predicate: &str) -> String {
        format!("SELECT {} FROM {} WHERE {}", select, self.table, predicate).replace("{col}", &self.col)
    }

    /// Count with the sentinel guard parameters bound when present
    fn count(&self, conn: &Connection, select: &str, predicate: &str) -> DbResult<u64> {
        let sql = self.sql(select, predicate);
        let mut stmt = conn.prepare_cached(&sql)?;

        let count: i64 = if predicate.contains(":file_not_found") {
            stmt.query_row(
                named_params! {
                    ":file_not_found": format!("{}%", FILE_NOT_FOUND),
                    ":link_not_found": format!("{}%", LINK_NOT_FOUND),
                },
                |row| row.get(0),
            )?
        } else {
            stmt.query_row([], |row| row.get(0))?
        };
        Ok(count.max(0) as u64)
    }

    fn count_regex(&self, conn: &Connection, pattern: &str) -> DbResult<u64> {
        let sql = self.sql("COUNT({col})", "{col} REGEXP ?1");
        let count: i64 = conn.prepare_cached(&sql)?.query_row([pattern], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn count_prefix(&self, conn: &Connection, sentinel: &str) -> DbResult<u64> {
        let sql = self.sql("COUNT({col})", "{col} LIKE ?1");
        let count: i64 = conn
            .prepare_cached(&sql)?
            .query_row([format!("{}%", sentinel)], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Rows whose value starts with `sentinel`, in natural store order
    fn rows_with_prefix(&self, conn: &Connection, row_key: &[String; 3], sentinel: &str) -> DbResult<Vec<RowRef>> {
        let select = row_key
            .iter()
            .map(|k| format!("CAST({} AS TEXT)", quote_identifier(k)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = self.sql(&select, "{col} LIKE ?1");

        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map([format!("{}%", sentinel)], |row| {
                Ok(RowRef {
                    id: row.get(0)?,
                    id_troncon: row.get(1)?,
                    code: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn stage_error(table: &str, source: DbError) -> FixerError {
    FixerError::Stage {
        stage: Stage::Statistics,
        table: table.to_string(),
        source,
    }
}
