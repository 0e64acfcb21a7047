//! CSV export of a whole table
//!
//! Rows are written to a staging file next to the target and renamed into
//! place once the last row is flushed, so a failed export never leaves a
//! truncated CSV behind under the requested name.

use crate::db::schema::{quote_identifier, validate_table};
use crate::error::{DbError, DbResult};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Export every row of `table` to `path` with a header row
///
/// Returns the number of data rows written.
pub fn export_table_csv(conn: &Connection, table: &str, path: &Path) -> DbResult<u64> {
    validate_table::<&str>(conn, table, &[])?;

    let staging = staging_path(path);
    debug!("Staging CSV export at {}", staging.display());

    let result = write_csv(conn, table, &staging, path);
    match result {
        Ok(rows) => {
            fs::rename(&staging, path).map_err(|e| export_error(path, e))?;
            info!(rows, "Exported table {} to {}", table, path.display());
            Ok(rows)
        }
        Err(e) => {
            let _ = fs::remove_file(&staging);
            Err(e)
        }
    }
}

fn write_csv(conn: &Connection, table: &str, staging: &Path, target: &Path) -> DbResult<u64> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_identifier(table)))?;
    let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = headers.len();

    let mut writer = csv::Writer::from_path(staging).map_err(|e| export_error(target, e))?;
    writer
        .write_record(&headers)
        .map_err(|e| export_error(target, e))?;

    let mut rows = stmt.query([])?;
    let mut written = 0u64;
    let mut record: Vec<String> = Vec::with_capacity(column_count);

    while let Some(row) = rows.next()? {
        record.clear();
        for idx in 0..column_count {
            record.push(render_value(row.get_ref(idx)?));
        }
        writer
            .write_record(&record)
            .map_err(|e| export_error(target, e))?;
        written += 1;
    }

    writer.flush().map_err(|e| export_error(target, e))?;
    Ok(written)
}

/// Render a SQLite value as CSV text (NULL becomes an empty field)
fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "export.csv".into());
    name.push(".partial");
    path.with_file_name(name)
}

fn export_error(path: &Path, err: impl std::fmt::Display) -> DbError {
    DbError::Export {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::open_in_memory;
    use tempfile::tempdir;

    #[test]
    fn test_export_with_nulls_and_quotes() {
        let conn = open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE survey (id TEXT, code TEXT, syno TEXT);
             INSERT INTO survey VALUES ('1', 'A,B', 'DCIM/a.jpg');
             INSERT INTO survey VALUES ('2', NULL, 'Link Not Found');",
        )
        .unwrap();

        let dir = tempdir().unwrap();
        let out = dir.path().join("survey.csv");
        let rows = export_table_csv(&conn, "survey", &out).unwrap();
        assert_eq!(rows, 2);

        let text = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,code,syno");
        assert_eq!(lines[1], "1,\"A,B\",DCIM/a.jpg");
        assert_eq!(lines[2], "2,,Link Not Found");
        assert!(!dir.path().join("survey.csv.partial").exists());
    }

    #[test]
    fn test_export_unknown_table() {
        let conn = open_in_memory().unwrap();
        let dir = tempdir().unwrap();
        let out = dir.path().join("x.csv");

        let err = export_table_csv(&conn, "missing", &out).unwrap_err();
        assert!(matches!(err, DbError::TableNotFound(_)));
        assert!(!out.exists());
    }
}
