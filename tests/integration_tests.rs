//! Integration tests for logsift
//!
//! Note: Redis tests need a live server and are ignored by default.
//! These tests use SQLite files and temporary sled stores only.

use logsift::db::schema::keys;
use logsift::db::{Backend, BackendConfig, BackendKind};
use logsift::error::{LogsiftError, QueryError};
use logsift::ingest::{ingest, ingest_with, IngestOptions};
use logsift::log::{parse_line, Record};
use logsift::query::QueryEngine;
use logsift::{close, connect};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const SCENARIO: &str = r#"203.0.113.9 (198.51.100.4) - - [10/Oct/2023:13:55:36 -0700] "GET /a/b/c HTTP/1.1" 200 512 45 7 "http://example.com/x" "TestAgent/1.0""#;

fn line(ff: &str, status: u32, time_taken: u64, worker: &str, ts: &str) -> String {
    format!(
        r#"10.0.0.1 ({ff}) - - [{ts}] "GET /api/v1/items HTTP/1.1" {status} 100 {time_taken} {worker} "https://shop.example/cart" "Agent/{worker}""#
    )
}

fn write_log(dir: &TempDir, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = fs::File::create(&path).unwrap();
    for l in lines {
        writeln!(file, "{}", l).unwrap();
    }
    path
}

fn sqlite_config(dir: &TempDir) -> BackendConfig {
    BackendConfig::sqlite(dir.path().join("logs.db"))
}

fn mixed_log(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            if i % 10 == 9 {
                format!("corrupted line {}", i)
            } else {
                line(
                    &format!("198.51.100.{}", i % 7),
                    if i % 4 == 0 { 503 } else { 200 },
                    (i as u64 * 37) % 1000,
                    &(i % 3).to_string(),
                    "10/Oct/2023:13:55:36 -0700",
                )
            }
        })
        .collect()
}

#[test]
fn test_scenario_line() {
    let record = parse_line(SCENARIO).unwrap();
    assert_eq!(
        record,
        Record {
            client_address: "203.0.113.9".into(),
            forwarded_for: "198.51.100.4".into(),
            timestamp: "10/Oct/2023:13:55:36 -0700".into(),
            request_line: "GET /a/b/c HTTP/1.1".into(),
            status_code: 200,
            response_size: 512,
            time_taken: 45,
            upstream_worker_name: "7".into(),
            referer: "http://example.com/x".into(),
            user_agent: "TestAgent/1.0".into(),
        }
    );

    let dir = tempdir().unwrap();
    let log = write_log(&dir, "access.log", &[SCENARIO.to_string()]);
    let mut conn = connect(&sqlite_config(&dir), "import").unwrap();
    let summary = ingest(&mut conn, &log).unwrap();
    assert_eq!(summary.records_written, 1);

    let engine = QueryEngine::new(&conn).unwrap();
    let groups = engine.counts_by_upstream_worker().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count, 1);
    assert_eq!(groups[0].upstream_worker_name, "7");
    assert_eq!(groups[0].forwarded_for, "198.51.100.4");
}

#[test]
fn test_reimport_is_idempotent() {
    let dir = tempdir().unwrap();
    let log = write_log(&dir, "access.log", &mixed_log(50));
    let config = sqlite_config(&dir);

    let mut conn = connect(&config, "import").unwrap();
    let first = ingest(&mut conn, &log).unwrap();
    close(conn).unwrap();

    let mut conn = connect(&config, "import").unwrap();
    let second = ingest(&mut conn, &log).unwrap();
    assert_eq!(first.records_written, second.records_written);
    assert_eq!(conn.record_count().unwrap(), 45);
    close(conn).unwrap();
}

#[test]
fn test_rejected_lines_are_counted() {
    let dir = tempdir().unwrap();
    let mut lines = mixed_log(20);
    // time_taken overflows u64
    lines.push(SCENARIO.replace(" 45 7 ", " 99999999999999999999999 7 "));
    let log = write_log(&dir, "access.log", &lines);

    let mut conn = connect(&sqlite_config(&dir), "import").unwrap();
    let summary = ingest(&mut conn, &log).unwrap();

    assert_eq!(summary.lines_read, 21);
    assert_eq!(summary.lines_rejected, 3);
    assert_eq!(summary.rejected_by_reason.get("malformed"), Some(&2));
    assert_eq!(summary.rejected_by_reason.get("invalid-number"), Some(&1));
    assert_eq!(summary.records_written, 18);
    assert!(summary.completed);
}

#[test]
fn test_parallel_matches_sequential() {
    let dir = tempdir().unwrap();
    let log = write_log(&dir, "access.log", &mixed_log(5_000));

    let mut seq = connect(&BackendConfig::sqlite(dir.path().join("seq.db")), "import").unwrap();
    let seq_summary = ingest(&mut seq, &log).unwrap();

    let mut par = connect(&BackendConfig::sqlite(dir.path().join("par.db")), "import").unwrap();
    let options = IngestOptions::default().with_workers(4).with_batch_size(250);
    let par_summary = ingest_with(&mut par, &log, &options).unwrap();

    assert_eq!(seq_summary.lines_read, par_summary.lines_read);
    assert_eq!(seq_summary.records_written, par_summary.records_written);
    assert_eq!(seq_summary.lines_rejected, par_summary.lines_rejected);

    let seq_groups = QueryEngine::new(&seq).unwrap().counts_by_upstream_worker().unwrap();
    let par_groups = QueryEngine::new(&par).unwrap().counts_by_upstream_worker().unwrap();
    assert_eq!(seq_groups, par_groups);
}

#[test]
fn test_import_metadata() {
    let dir = tempdir().unwrap();
    let log = write_log(&dir, "access.log", &mixed_log(10));
    let mut conn = connect(&sqlite_config(&dir), "weblogs").unwrap();
    ingest(&mut conn, &log).unwrap();

    let Backend::Relational(db) = conn.backend() else {
        panic!("expected relational backend");
    };
    let dest = conn.destination();
    assert_eq!(db.import_info(dest, keys::STATUS).unwrap().as_deref(), Some("completed"));
    assert_eq!(db.import_info(dest, keys::RECORDS_WRITTEN).unwrap().as_deref(), Some("9"));
    assert_eq!(db.import_info(dest, keys::LINES_REJECTED).unwrap().as_deref(), Some("1"));
    assert_eq!(
        db.import_info(dest, keys::SOURCE_FILE).unwrap(),
        Some(log.display().to_string())
    );
}

#[test]
fn test_interrupted_import() {
    let dir = tempdir().unwrap();
    let log = write_log(&dir, "access.log", &mixed_log(100));
    let mut conn = connect(&sqlite_config(&dir), "import").unwrap();

    let options = IngestOptions::default().with_shutdown(Arc::new(AtomicBool::new(true)));
    let summary = ingest_with(&mut conn, &log, &options).unwrap();
    assert!(!summary.completed);

    let Backend::Relational(db) = conn.backend() else {
        panic!("expected relational backend");
    };
    assert_eq!(
        db.import_info(conn.destination(), keys::STATUS).unwrap().as_deref(),
        Some("interrupted")
    );
}

#[test]
fn test_destinations_are_independent() {
    let dir = tempdir().unwrap();
    let small = write_log(&dir, "small.log", &mixed_log(10));
    let large = write_log(&dir, "large.log", &mixed_log(30));
    let config = sqlite_config(&dir);

    let mut a = connect(&config, "day_one").unwrap();
    ingest(&mut a, &small).unwrap();
    close(a).unwrap();

    let mut b = connect(&config, "day_two").unwrap();
    ingest(&mut b, &large).unwrap();
    close(b).unwrap();

    let mut a = connect(&config, "day_one").unwrap();
    assert_eq!(a.record_count().unwrap(), 9);
    let mut b = connect(&config, "day_two").unwrap();
    assert_eq!(b.record_count().unwrap(), 27);
}

#[test]
fn test_extreme_latency_after_import() {
    let dir = tempdir().unwrap();
    let lines: Vec<String> = [120, 5, 900, 42]
        .iter()
        .map(|t| line("198.51.100.1", 200, *t, "1", "10/Oct/2023:13:55:36 -0700"))
        .collect();
    let log = write_log(&dir, "access.log", &lines);
    let mut conn = connect(&sqlite_config(&dir), "import").unwrap();
    ingest(&mut conn, &log).unwrap();

    let engine = QueryEngine::new(&conn).unwrap();
    let slowest: Vec<u64> = engine
        .extreme_latency_queries(2, true)
        .unwrap()
        .iter()
        .map(|r| r.time_taken)
        .collect();
    assert_eq!(slowest, vec![900, 120]);

    let all = engine.extreme_latency_queries(100, false).unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].time_taken, 5);
}

#[test]
fn test_missing_database_directory() {
    let err = connect(&BackendConfig::sqlite(Path::new("/nonexistent/dir/logs.db")), "import").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/dir/logs.db"));
}

#[cfg(feature = "document")]
#[test]
fn test_document_import() {
    let dir = tempdir().unwrap();
    let log = write_log(&dir, "access.log", &mixed_log(40));
    let config = BackendConfig::document(dir.path().join("logs.docs"));

    let mut conn = connect(&config, "import").unwrap();
    assert_eq!(conn.kind(), BackendKind::Document);
    let summary = ingest_with(&mut conn, &log, &IngestOptions::default().with_batch_size(7)).unwrap();
    assert_eq!(summary.records_written, 36);
    assert_eq!(conn.record_count().unwrap(), 36);

    // Re-import replaces the collection
    ingest(&mut conn, &log).unwrap();
    assert_eq!(conn.record_count().unwrap(), 36);

    let err = QueryEngine::new(&conn).err().unwrap();
    assert!(matches!(err, QueryError::Unsupported { backend: BackendKind::Document }));
    close(conn).unwrap();
}

#[cfg(feature = "kv")]
#[test]
#[ignore = "needs a Redis server at LOGSIFT_REDIS_URL"]
fn test_key_value_import_per_record() {
    use logsift::db::KeyLayout;

    let url = std::env::var("LOGSIFT_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let dir = tempdir().unwrap();
    let log = write_log(&dir, "access.log", &mixed_log(20));

    let mut conn = connect(&BackendConfig::key_value(&url, KeyLayout::PerRecord), "logsift_it").unwrap();
    let summary = ingest(&mut conn, &log).unwrap();
    assert_eq!(summary.records_written, 18);
    assert_eq!(conn.record_count().unwrap(), 18);
    close(conn).unwrap();
}

#[test]
fn test_missing_log_file_is_config_error() {
    let dir = tempdir().unwrap();
    let mut conn = connect(&sqlite_config(&dir), "import").unwrap();
    let err = ingest(&mut conn, &dir.path().join("absent.log")).unwrap_err();
    assert!(matches!(err, LogsiftError::Config(_)));
}
