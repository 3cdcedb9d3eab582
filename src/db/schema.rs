//! Destination schema definitions and provisioning
//!
//! Defines the SQLite layout for imported records and the `ensure_schema`
//! step every import runs before writing: create the destination if it is
//! missing, then remove whatever a previous import left behind.

use crate::db::{Backend, Destination};
use crate::error::{BackendError, BackendResult, SchemaError};
use crate::log::Record;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create import metadata table
const CREATE_IMPORT_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS import_info (
    destination TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (destination, key)
)
"#;

/// SQLite pragmas for write throughput
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;      -- 64MB cache
PRAGMA temp_store = MEMORY;
PRAGMA wal_autocheckpoint = 10000;
"#;

/// Apply connection-level pragmas
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(WRITE_PRAGMAS)
}

/// SQL to create a destination table
///
/// `id` is an INTEGER PRIMARY KEY (rowid alias) so insertion order is
/// recoverable and gives queries a stable tie-breaker.
fn create_destination_sql(dest: &Destination) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY,
    client_address TEXT NOT NULL,
    forwarded_for TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    request_line TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    response_size INTEGER NOT NULL,
    time_taken INTEGER NOT NULL,
    upstream_worker_name TEXT NOT NULL,
    referer TEXT NOT NULL,
    user_agent TEXT NOT NULL
)
"#,
        dest.quoted()
    )
}

/// Index statements for a destination (created after the bulk insert)
fn index_sql(dest: &Destination) -> Vec<String> {
    [
        ("worker", "upstream_worker_name"),
        ("status", "status_code"),
        ("time_taken", "time_taken"),
        ("groups", "forwarded_for, user_agent, referer, upstream_worker_name"),
    ]
    .iter()
    .map(|(suffix, columns)| {
        format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{}_{}\" ON {}({})",
            dest.as_str(),
            suffix,
            dest.quoted(),
            columns
        )
    })
    .collect()
}

/// Create the metadata table and the destination table if missing
pub fn create_tables(conn: &Connection, dest: &Destination) -> BackendResult<()> {
    conn.execute(CREATE_IMPORT_INFO_TABLE, [])?;
    conn.execute(&create_destination_sql(dest), [])?;
    verify_columns(conn, dest)?;
    Ok(())
}

/// Check that an existing destination table has every record column
fn verify_columns(conn: &Connection, dest: &Destination) -> BackendResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", dest.quoted()))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<Result<Vec<_>, _>>()?;

    for name in Record::FIELD_NAMES {
        if !columns.iter().any(|c| c == name) {
            return Err(BackendError::Sqlite(rusqlite::Error::InvalidColumnName(
                format!("{}.{}", dest, name),
            )));
        }
    }
    Ok(())
}

/// Whether the destination table exists
pub fn table_exists(conn: &Connection, dest: &Destination) -> BackendResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [dest.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Delete every row from the destination, returning how many were removed
pub fn clear_table(conn: &Connection, dest: &Destination) -> BackendResult<u64> {
    let removed = conn.execute(&format!("DELETE FROM {}", dest.quoted()), [])?;
    conn.execute(
        "DELETE FROM import_info WHERE destination = ?1",
        [dest.as_str()],
    )?;
    Ok(removed as u64)
}

/// Create indexes (called after the import for better insert performance)
pub fn create_indexes(conn: &Connection, dest: &Destination) -> BackendResult<()> {
    for sql in index_sql(dest) {
        conn.execute(&sql, [])?;
    }
    Ok(())
}

/// Refresh planner statistics
pub fn optimize_for_reads(conn: &Connection) -> BackendResult<()> {
    conn.execute("ANALYZE", [])?;
    Ok(())
}

/// Store import metadata
pub fn set_import_info(
    conn: &Connection,
    dest: &Destination,
    key: &str,
    value: &str,
) -> BackendResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO import_info (destination, key, value) VALUES (?1, ?2, ?3)",
        [dest.as_str(), key, value],
    )?;
    Ok(())
}

/// Get import metadata
pub fn get_import_info(
    conn: &Connection,
    dest: &Destination,
    key: &str,
) -> BackendResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM import_info WHERE destination = ?1 AND key = ?2",
        [dest.as_str(), key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Provision `dest` on `backend` and clear stale records
///
/// Runs before every import. Relational: creates the table if absent and
/// deletes existing rows. Document: empties the collection. Key-value:
/// deletes the destination key(s).
pub fn ensure_schema(backend: &mut Backend, dest: &Destination) -> Result<(), SchemaError> {
    debug!(backend = %backend.kind(), destination = %dest, "Preparing destination");

    let removed = backend.prepare(dest).map_err(|source| SchemaError {
        destination: dest.to_string(),
        source,
    })?;

    info!(
        backend = %backend.kind(),
        destination = %dest,
        removed,
        "Destination ready"
    );
    Ok(())
}

/// Metadata keys recorded per import
pub mod keys {
    /// Log file that was imported
    pub const SOURCE_FILE: &str = "source_file";

    /// Timestamp when import started (RFC 3339)
    pub const START_TIME: &str = "start_time";

    /// Timestamp when import finished (RFC 3339)
    pub const END_TIME: &str = "end_time";

    /// Total duration in seconds
    pub const DURATION_SECS: &str = "duration_secs";

    /// Lines read from the file
    pub const LINES_READ: &str = "lines_read";

    /// Records successfully written
    pub const RECORDS_WRITTEN: &str = "records_written";

    /// Lines rejected by the parser
    pub const LINES_REJECTED: &str = "lines_rejected";

    /// Records that failed to write
    pub const RECORDS_FAILED: &str = "records_failed";

    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Importer version
    pub const IMPORTER_VERSION: &str = "importer_version";

    /// Import status: "running", "completed", "interrupted"
    pub const STATUS: &str = "status";
}
