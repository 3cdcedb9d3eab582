//! Relational backend (SQLite)
//!
//! One table per destination, one row per record. Records are inserted in
//! batch transactions through a cached prepared statement; a row that fails
//! to insert is reported on its own while the rest of the batch commits.

use crate::db::schema::{self, keys};
use crate::db::writer::{BatchFailure, BatchOutcome};
use crate::db::Destination;
use crate::error::{BackendResult, ConnectionError, WriteError};
use crate::ingest::ImportSummary;
use crate::log::Record;
use crate::query::functions;
use chrono::Utc;
use rusqlite::{named_params, Connection, Row, ToSql};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path that opens an in-memory database
pub const MEMORY_PATH: &str = ":memory:";

/// SQLite connection plus the file it came from
pub struct SqliteBackend {
    conn: Connection,
    path: PathBuf,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`
    ///
    /// Applies write pragmas and registers the log helper SQL functions.
    pub fn open(path: &Path) -> Result<Self, ConnectionError> {
        let wrap = |source: rusqlite::Error| ConnectionError::Sqlite {
            path: path.to_path_buf(),
            source,
        };

        let conn = if path.as_os_str() == MEMORY_PATH {
            Connection::open_in_memory().map_err(wrap)?
        } else {
            Connection::open(path).map_err(wrap)?
        };

        schema::configure_connection(&conn).map_err(wrap)?;
        functions::register_functions(&conn).map_err(wrap)?;

        debug!(path = %path.display(), "Opened SQLite database");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, ConnectionError> {
        Self::open(Path::new(MEMORY_PATH))
    }

    /// Database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying rusqlite connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the destination if missing and delete its rows
    pub fn prepare(&self, dest: &Destination) -> BackendResult<u64> {
        schema::create_tables(&self.conn, dest)?;
        schema::clear_table(&self.conn, dest)
    }

    /// Insert a batch in one transaction
    pub fn insert_batch(&self, dest: &Destination, records: &[Record]) -> BatchOutcome {
        if records.is_empty() {
            return BatchOutcome::default();
        }

        match self.try_insert_batch(dest, records) {
            Ok(outcome) => outcome,
            Err(e) => BatchOutcome::batch_failed(records.len(), WriteError(e.into())),
        }
    }

    fn try_insert_batch(&self, dest: &Destination, records: &[Record]) -> rusqlite::Result<BatchOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let mut outcome = BatchOutcome::default();

        {
            let mut stmt = tx.prepare_cached(&insert_sql(dest))?;

            for (index, record) in records.iter().enumerate() {
                let result = stmt.execute(named_params! {
                    ":client_address": record.client_address,
                    ":forwarded_for": record.forwarded_for,
                    ":timestamp": record.timestamp,
                    ":request_line": record.request_line,
                    ":status_code": record.status_code,
                    ":response_size": record.response_size,
                    ":time_taken": record.time_taken,
                    ":upstream_worker_name": record.upstream_worker_name,
                    ":referer": record.referer,
                    ":user_agent": record.user_agent,
                });

                match result {
                    Ok(_) => outcome.written += 1,
                    Err(e) => outcome
                        .failures
                        .push(BatchFailure::record(index, WriteError(e.into()))),
                }
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Run a read query, decoding each row with `decode`
    pub fn query_map<T, F>(
        &self,
        sql: &str,
        params: &[(&str, &dyn ToSql)],
        decode: F,
    ) -> BackendResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, decode)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows stored in the destination (0 if it does not exist yet)
    pub fn count(&self, dest: &Destination) -> BackendResult<u64> {
        if !schema::table_exists(&self.conn, dest)? {
            return Ok(0);
        }
        let count: u64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", dest.quoted()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// All records in insertion order
    pub fn records(&self, dest: &Destination) -> BackendResult<Vec<Record>> {
        self.query_map(
            &format!("SELECT * FROM {} ORDER BY id", dest.quoted()),
            &[],
            record_from_row,
        )
    }

    /// Write the "running" metadata for a new import
    pub fn begin_import(&self, dest: &Destination, source: &Path) -> BackendResult<()> {
        schema::set_import_info(&self.conn, dest, keys::SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
        schema::set_import_info(&self.conn, dest, keys::IMPORTER_VERSION, env!("CARGO_PKG_VERSION"))?;
        schema::set_import_info(&self.conn, dest, keys::SOURCE_FILE, &source.display().to_string())?;
        schema::set_import_info(&self.conn, dest, keys::START_TIME, &Utc::now().to_rfc3339())?;
        schema::set_import_info(&self.conn, dest, keys::STATUS, "running")?;
        Ok(())
    }

    /// Create indexes, record final metadata and refresh statistics
    pub fn finish_import(&self, dest: &Destination, summary: &ImportSummary) -> BackendResult<()> {
        schema::create_indexes(&self.conn, dest)?;

        let status = if summary.completed { "completed" } else { "interrupted" };
        let info = [
            (keys::END_TIME, Utc::now().to_rfc3339()),
            (keys::DURATION_SECS, format!("{:.3}", summary.duration.as_secs_f64())),
            (keys::LINES_READ, summary.lines_read.to_string()),
            (keys::RECORDS_WRITTEN, summary.records_written.to_string()),
            (keys::LINES_REJECTED, summary.lines_rejected.to_string()),
            (keys::RECORDS_FAILED, summary.records_failed.to_string()),
            (keys::STATUS, status.to_string()),
        ];
        for (key, value) in &info {
            schema::set_import_info(&self.conn, dest, key, value)?;
        }

        schema::optimize_for_reads(&self.conn)?;
        Ok(())
    }

    /// Import metadata value
    pub fn import_info(&self, dest: &Destination, key: &str) -> BackendResult<Option<String>> {
        schema::get_import_info(&self.conn, dest, key)
    }

    /// Close the database
    pub fn close(self) -> BackendResult<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}

fn insert_sql(dest: &Destination) -> String {
    format!(
        "INSERT INTO {} (client_address, forwarded_for, timestamp, request_line, status_code,
         response_size, time_taken, upstream_worker_name, referer, user_agent)
         VALUES (:client_address, :forwarded_for, :timestamp, :request_line, :status_code,
         :response_size, :time_taken, :upstream_worker_name, :referer, :user_agent)",
        dest.quoted()
    )
}

/// Decode a full record row by column name
pub fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        client_address: row.get("client_address")?,
        forwarded_for: row.get("forwarded_for")?,
        timestamp: row.get("timestamp")?,
        request_line: row.get("request_line")?,
        status_code: row.get("status_code")?,
        response_size: row.get("response_size")?,
        time_taken: row.get("time_taken")?,
        upstream_worker_name: row.get("upstream_worker_name")?,
        referer: row.get("referer")?,
        user_agent: row.get("user_agent")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dest() -> Destination {
        Destination::new("import").unwrap()
    }

    fn record(status: u32, size: u64) -> Record {
        Record {
            client_address: "203.0.113.9".into(),
            forwarded_for: "198.51.100.4".into(),
            timestamp: "10/Oct/2023:13:55:36 -0700".into(),
            request_line: "GET /a/b/c HTTP/1.1".into(),
            status_code: status,
            response_size: size,
            time_taken: 45,
            upstream_worker_name: "7".into(),
            referer: "http://example.com/x".into(),
            user_agent: "TestAgent/1.0".into(),
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.prepare(&dest()).unwrap();

        let batch = vec![record(200, 512), record(404, 0)];
        let outcome = db.insert_batch(&dest(), &batch);
        assert_eq!(outcome.written, 2);
        assert!(outcome.failures.is_empty());

        assert_eq!(db.count(&dest()).unwrap(), 2);
        assert_eq!(db.records(&dest()).unwrap(), batch);
    }

    #[test]
    fn test_out_of_range_record_fails_alone() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.prepare(&dest()).unwrap();

        // u64::MAX does not fit a SQLite INTEGER
        let batch = vec![record(200, 1), record(200, u64::MAX), record(200, 2)];
        let outcome = db.insert_batch(&dest(), &batch);

        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 1);
        assert_eq!(db.count(&dest()).unwrap(), 2);
    }

    #[test]
    fn test_prepare_clears_previous_rows() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.prepare(&dest()).unwrap();
        db.insert_batch(&dest(), &[record(200, 1)]);

        assert_eq!(db.prepare(&dest()).unwrap(), 1);
        assert_eq!(db.count(&dest()).unwrap(), 0);
    }

    #[test]
    fn test_count_missing_table() {
        let db = SqliteBackend::open_in_memory().unwrap();
        assert_eq!(db.count(&dest()).unwrap(), 0);
    }

    #[test]
    fn test_insert_without_table_fails_whole_batch() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let outcome = db.insert_batch(&dest(), &[record(200, 1), record(200, 2)]);
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.failed_records(), 2);
    }

    #[test]
    fn test_import_metadata_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.db");

        let db = SqliteBackend::open(&path).unwrap();
        db.prepare(&dest()).unwrap();
        db.begin_import(&dest(), Path::new("access.log")).unwrap();
        db.close().unwrap();

        let db = SqliteBackend::open(&path).unwrap();
        assert_eq!(
            db.import_info(&dest(), keys::STATUS).unwrap().as_deref(),
            Some("running")
        );
        assert_eq!(
            db.import_info(&dest(), keys::SOURCE_FILE).unwrap().as_deref(),
            Some("access.log")
        );
    }
}
