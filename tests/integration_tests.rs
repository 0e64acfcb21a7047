//! Integration tests for dcim-fixer
//!
//! Every test works on a file-backed SQLite database and a temporary
//! photo folder, the way the CLI runs.

use dcim_fixer::config::{FixOptions, PipelineConfig};
use dcim_fixer::db::{export_table_csv, open_database};
use dcim_fixer::error::{ConfigError, FixerError, Stage};
use dcim_fixer::pipeline::{Pipeline, FILE_NOT_FOUND, LINK_NOT_FOUND};
use dcim_fixer::progress::{NoProgress, ProgressEvent};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

struct Fixture {
    _dir: TempDir,
    db_path: PathBuf,
    photos: PathBuf,
}

/// Survey table with two watched columns and a photo folder holding
/// DCIM/101.jpg, DCIM/qfield_202.jpeg and DCIM/IMG_1.jpg
fn fixture(rows: &[(&str, Option<&str>, Option<&str>)]) -> Fixture {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("survey.db");
    let photos = dir.path().join("photos");

    fs::create_dir_all(photos.join("DCIM")).unwrap();
    for name in ["101.jpg", "qfield_202.jpeg", "IMG_1.jpg"] {
        fs::write(photos.join("DCIM").join(name), b"jpeg").unwrap();
    }

    let conn = Connection::open(&db_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE visits (
            id INTEGER PRIMARY KEY,
            id_troncon TEXT,
            code TEXT,
            syno TEXT,
            pht_mas_a TEXT
        )",
    )
    .unwrap();
    for (code, syno, pht) in rows {
        conn.execute(
            "INSERT INTO visits (id_troncon, code, syno, pht_mas_a) VALUES ('T1', ?1, ?2, ?3)",
            rusqlite::params![code, syno, pht],
        )
        .unwrap();
    }

    Fixture {
        _dir: dir,
        db_path,
        photos,
    }
}

fn standard_rows() -> Vec<(&'static str, Option<&'static str>, Option<&'static str>)> {
    vec![
        ("A", Some("files101.jpg"), None),
        ("B", Some("files/qfield_202"), Some("DCIM/IMG_1.png.jpg")),
        ("C", Some("DCIM/gone.heic"), Some("")),
        ("D", Some(LINK_NOT_FOUND), Some(FILE_NOT_FOUND)),
    ]
}

fn config() -> PipelineConfig {
    PipelineConfig::with_columns(&["syno", "pht_mas_a"])
}

fn options(photos: &Path) -> FixOptions {
    FixOptions {
        base_folder: Some(photos.to_path_buf()),
        ..FixOptions::default()
    }
}

fn snapshot(conn: &Connection) -> Vec<(Option<String>, Option<String>)> {
    let mut stmt = conn
        .prepare("SELECT syno, pht_mas_a FROM visits ORDER BY id")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn pair(a: &str, b: &str) -> (Option<String>, Option<String>) {
    (Some(a.to_string()), Some(b.to_string()))
}

#[test]
fn test_full_pipeline() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();
    let pipeline = Pipeline::new(&conn, "visits", config());

    let outcome = pipeline.run(&options(&fx.photos), &mut NoProgress).unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.missing_updates, 1);
    assert_eq!(
        snapshot(&conn),
        vec![
            pair("DCIM/101.jpg", LINK_NOT_FOUND),
            pair("DCIM/qfield_202.jpeg", "DCIM/IMG_1.jpg"),
            pair(FILE_NOT_FOUND, LINK_NOT_FOUND),
            pair(LINK_NOT_FOUND, FILE_NOT_FOUND),
        ]
    );
}

#[test]
fn test_second_run_changes_nothing() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();
    let pipeline = Pipeline::new(&conn, "visits", config());

    pipeline.run(&options(&fx.photos), &mut NoProgress).unwrap();
    let after_first = snapshot(&conn);

    let second = pipeline.run(&options(&fx.photos), &mut NoProgress).unwrap();
    assert_eq!(second.format_updates, 0);
    assert_eq!(second.missing_updates, 0);
    assert_eq!(snapshot(&conn), after_first);
}

#[test]
fn test_changes_survive_reopen() {
    let fx = fixture(&standard_rows());
    {
        let conn = open_database(&fx.db_path).unwrap();
        Pipeline::new(&conn, "visits", config())
            .run(&options(&fx.photos), &mut NoProgress)
            .unwrap();
    }

    let conn = open_database(&fx.db_path).unwrap();
    assert_eq!(snapshot(&conn)[0], pair("DCIM/101.jpg", LINK_NOT_FOUND));
}

#[test]
fn test_rule_failure_rolls_back_every_column() {
    let fx = fixture(&[("A", Some("files101.jpg"), Some("files/late.jpg"))]);
    let conn = open_database(&fx.db_path).unwrap();

    // Fires on the very last statement of the pass (rule 7, last column)
    conn.execute_batch(
        "CREATE TRIGGER fail_late BEFORE UPDATE OF pht_mas_a ON visits
         WHEN NEW.pht_mas_a LIKE 'DCIM/%' AND OLD.pht_mas_a LIKE 'files/%'
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    )
    .unwrap();

    let before = snapshot(&conn);
    let pipeline = Pipeline::new(&conn, "visits", config());
    let err = pipeline
        .run(&options(&fx.photos), &mut NoProgress)
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Rules));
    assert!(err.to_string().contains("rolled back"));
    assert_eq!(snapshot(&conn), before);
}

#[test]
fn test_verify_failure_keeps_committed_rules() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();

    conn.execute_batch(
        "CREATE TRIGGER fail_verify BEFORE UPDATE OF syno ON visits
         WHEN NEW.syno = 'File Not Found'
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    )
    .unwrap();

    let pipeline = Pipeline::new(&conn, "visits", config());
    let err = pipeline
        .run(&options(&fx.photos), &mut NoProgress)
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Verify));

    let rows = snapshot(&conn);
    assert_eq!(rows[0].0.as_deref(), Some("DCIM/101.jpg"));
    // Normalized by the rules, not marked by the failed verification
    assert_eq!(rows[2].0.as_deref(), Some("DCIM/gone.jpg"));
}

#[test]
fn test_missing_folder_rejected_before_store_access() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();
    let before = snapshot(&conn);

    let pipeline = Pipeline::new(&conn, "visits", config());
    let err = pipeline
        .run(&FixOptions::default(), &mut NoProgress)
        .unwrap_err();
    assert!(matches!(err, FixerError::Config(ConfigError::MissingFolder)));

    let bad_folder = FixOptions {
        base_folder: Some(fx.photos.join("does-not-exist")),
        ..FixOptions::default()
    };
    let err = pipeline.run(&bad_folder, &mut NoProgress).unwrap_err();
    assert!(err.is_config());

    assert_eq!(snapshot(&conn), before);
}

#[test]
fn test_rules_only_without_folder() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();
    let pipeline = Pipeline::new(&conn, "visits", config());

    let options = FixOptions {
        check_existence: false,
        ..FixOptions::default()
    };
    let outcome = pipeline.run(&options, &mut NoProgress).unwrap();

    assert_eq!(outcome.missing_updates, 0);
    assert!(outcome.verify.is_none());
    // The absent photo keeps its normalized path
    assert_eq!(snapshot(&conn)[2].0.as_deref(), Some("DCIM/gone.jpg"));
}

#[test]
fn test_statistics_after_fix() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();
    let pipeline = Pipeline::new(&conn, "visits", config());
    pipeline.run(&options(&fx.photos), &mut NoProgress).unwrap();

    let report = pipeline.statistics().unwrap();
    assert_eq!(report.table, "visits");
    assert_eq!(report.columns.len(), 2);

    for col in &report.columns {
        assert_eq!(col.empty_or_null_count, 0, "{}", col.column);
        assert_eq!(col.wrong_path_count, 0, "{}", col.column);
        assert_eq!(col.malformed_count(), 0, "{}", col.column);
        assert_eq!(
            col.total_count,
            col.file_not_found_count + col.link_not_found_count + col.valid_count(),
            "{}",
            col.column
        );
    }

    let syno = report.column("syno").unwrap();
    assert_eq!(syno.label, "Photo Feuille Manuel");
    assert_eq!(syno.jpg_count, 1);
    assert_eq!(syno.jpeg_count, 1);
    assert_eq!(syno.file_not_found_rows.len(), 1);
    assert_eq!(syno.file_not_found_rows[0].code.as_deref(), Some("C"));
    assert_eq!(syno.file_not_found_rows[0].id.as_deref(), Some("3"));

    let pht = report.column("pht_mas_a").unwrap();
    assert_eq!(pht.link_not_found_count, 2);
    assert_eq!(pht.file_not_found_count, 1);
    assert_eq!(report.total_link_not_found(), 3);
}

#[test]
fn test_progress_over_channel() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();
    let pipeline = Pipeline::new(&conn, "visits", config());

    let (tx, rx) = crossbeam_channel::unbounded::<ProgressEvent>();
    let mut sink = tx;
    pipeline.run(&options(&fx.photos), &mut sink).unwrap();
    drop(sink);

    let events: Vec<ProgressEvent> = rx.iter().collect();
    assert_eq!(events.first().map(|e| e.percent), Some(0.0));

    let last = events.last().unwrap();
    assert_eq!(last.percent, 100.0);
    assert_eq!(last.message, "All operations completed successfully!");

    for pair in events.windows(2) {
        assert!(
            pair[1].percent >= pair[0].percent,
            "progress went backwards: {:?}",
            pair
        );
    }
}

#[test]
fn test_export_after_fix() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();
    Pipeline::new(&conn, "visits", config())
        .run(&options(&fx.photos), &mut NoProgress)
        .unwrap();

    let out = fx.db_path.with_file_name("visits.csv");
    let rows = export_table_csv(&conn, "visits", &out).unwrap();
    assert_eq!(rows, 4);

    let text = fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("id,id_troncon,code,syno,pht_mas_a"));
    assert_eq!(lines.next(), Some("1,T1,A,DCIM/101.jpg,Link Not Found"));
}

#[test]
fn test_unknown_table_is_rejected() {
    let fx = fixture(&standard_rows());
    let conn = open_database(&fx.db_path).unwrap();

    let pipeline = Pipeline::new(&conn, "visits; DROP TABLE visits", config());
    assert!(pipeline.run(&options(&fx.photos), &mut NoProgress).is_err());

    let pipeline = Pipeline::new(&conn, "no_such_table", config());
    assert!(matches!(
        pipeline.run(&options(&fx.photos), &mut NoProgress),
        Err(FixerError::Database(_))
    ));

    // Still there
    assert_eq!(snapshot(&conn).len(), 4);
}
