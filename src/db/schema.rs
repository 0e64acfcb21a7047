//! Connection setup, SQL functions and identifier validation
//!
//! Table and column names cannot be bound as query parameters, so they are
//! checked against a strict pattern and against the live schema before any
//! statement interpolates them.

use crate::error::{DbError, DbResult};
use regex::Regex;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Plain SQL identifiers only: no quoting, no schema prefix
static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex")
});

/// How long to wait on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Open an existing database file for reading and writing
///
/// The file must already exist: a missing database is a connectivity
/// failure, not an empty table.
pub fn open_database(path: &Path) -> DbResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    register_functions(&conn)?;

    Ok(conn)
}

/// Open a private in-memory database with the SQL functions registered
pub fn open_in_memory() -> DbResult<Connection> {
    let conn = Connection::open_in_memory()?;
    register_functions(&conn)?;
    Ok(conn)
}

/// Register `REGEXP` and `regexp_replace` on a connection
///
/// - `value REGEXP pattern` is true when `pattern` matches anywhere in `value`
/// - `regexp_replace(value, pattern, replacement)` replaces the first match
///
/// NULL inputs yield NULL. Compiled patterns are cached per statement.
pub fn register_functions(conn: &Connection) -> DbResult<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    // SQLite rewrites `X REGEXP Y` as regexp(Y, X)
    conn.create_scalar_function("regexp", 2, flags, |ctx| {
        let regex = cached_regex(ctx, 0)?;
        let value: Option<String> = ctx.get(1)?;
        Ok(value.map(|v| regex.is_match(&v)))
    })?;

    conn.create_scalar_function("regexp_replace", 3, flags, |ctx| {
        let regex = cached_regex(ctx, 1)?;
        let value: Option<String> = ctx.get(0)?;
        let replacement: String = ctx.get(2)?;
        Ok(value.map(|v| regex.replacen(&v, 1, replacement.as_str()).into_owned()))
    })?;

    Ok(())
}

fn cached_regex(ctx: &Context<'_>, arg: usize) -> rusqlite::Result<Arc<Regex>> {
    ctx.get_or_create_aux(arg as i32, |value| -> Result<Regex, BoxError> {
        Ok(Regex::new(value.as_str()?)?)
    })
}

/// Check that a name is a plain SQL identifier
pub fn validate_identifier(name: &str) -> DbResult<()> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

/// Quote an identifier for interpolation into SQL
///
/// Callers must have passed the name through [`validate_identifier`].
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Check whether a table exists
pub fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Column names of a table, in declaration order
pub fn table_columns(conn: &Connection, table: &str) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(columns)
}

/// Validate a table and the columns a stage is about to interpolate
pub fn validate_table<S: AsRef<str>>(conn: &Connection, table: &str, columns: &[S]) -> DbResult<()> {
    validate_identifier(table)?;
    if !table_exists(conn, table)? {
        return Err(DbError::TableNotFound(table.to_string()));
    }

    let existing = table_columns(conn, table)?;
    for column in columns {
        let column = column.as_ref();
        validate_identifier(column)?;
        if !existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            return Err(DbError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
    }

    Ok(())
}

/// List user tables, sorted by name
pub fn list_tables(conn: &Connection) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tables)
}

/// Count all rows of a validated table
pub fn count_rows(conn: &Connection, table: &str) -> DbResult<u64> {
    validate_identifier(table)?;
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}
