//! Log file import
//!
//! Ties the pieces together for one run: open the file, prepare the
//! destination, stream lines through the parser into a [`BatchWriter`],
//! then finalize the destination and report an [`ImportSummary`].
//!
//! ```text
//! file ──read──▶ lines ──parse──▶ Records ──push──▶ BatchWriter ──▶ Connection
//!                  │ (workers > 1: reader thread → N parser threads)
//!                  └─ rejected lines are counted by reason, never fatal
//! ```

mod pipeline;

use crate::db::{BatchWriter, Connection, WriteFailure, DEFAULT_BATCH_SIZE};
use crate::error::{ConfigError, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Read buffer for the log file
const READ_BUFFER_SIZE: usize = 1 << 20;

/// Knobs for one import
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Records per batch
    pub batch_size: usize,

    /// Parser threads; 1 parses on the calling thread
    pub workers: usize,

    /// Stop accepting records once this is set
    pub shutdown: Option<Arc<AtomicBool>>,

    /// Live counters for a progress display
    pub progress: Option<Arc<ImportProgress>>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
            shutdown: None,
            progress: None,
        }
    }
}

impl IngestOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_progress(mut self, progress: Arc<ImportProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Counters shared with a progress display while an import runs
#[derive(Debug, Default)]
pub struct ImportProgress {
    lines_read: AtomicU64,
    records_parsed: AtomicU64,
    lines_rejected: AtomicU64,
    records_written: AtomicU64,
}

/// Point-in-time copy of [`ImportProgress`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub lines_read: u64,
    pub records_parsed: u64,
    pub lines_rejected: u64,
    pub records_written: u64,
}

impl ImportProgress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            records_parsed: self.records_parsed.load(Ordering::Relaxed),
            lines_rejected: self.lines_rejected.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
        }
    }

    fn store(&self, snapshot: ProgressSnapshot) {
        self.lines_read.store(snapshot.lines_read, Ordering::Relaxed);
        self.records_parsed.store(snapshot.records_parsed, Ordering::Relaxed);
        self.lines_rejected.store(snapshot.lines_rejected, Ordering::Relaxed);
        self.records_written.store(snapshot.records_written, Ordering::Relaxed);
    }
}

/// Result of one import run
#[derive(Debug)]
pub struct ImportSummary {
    /// Lines consumed from the file
    pub lines_read: u64,

    /// Lines that parsed into records
    pub records_parsed: u64,

    /// Lines rejected by the parser
    pub lines_rejected: u64,

    /// Rejections keyed by reason label
    pub rejected_by_reason: BTreeMap<&'static str, u64>,

    /// Records persisted
    pub records_written: u64,

    /// Records that failed to persist
    pub records_failed: u64,

    /// Batches handed to the backend
    pub batches_flushed: u64,

    /// Write failures, in import order
    pub errors: Vec<WriteFailure>,

    /// Wall-clock time
    pub duration: Duration,

    /// False when the run stopped early on request
    pub completed: bool,
}

impl ImportSummary {
    /// True when every line parsed and every record was written
    pub fn is_clean(&self) -> bool {
        self.lines_rejected == 0 && self.records_failed == 0
    }

    /// Lines per second over the whole run
    pub fn lines_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.lines_read as f64 / secs
        } else {
            0.0
        }
    }
}

/// Import `path` into the connection's destination with default options
pub fn ingest(conn: &mut Connection, path: &Path) -> Result<ImportSummary> {
    ingest_with(conn, path, &IngestOptions::default())
}

/// Import `path` into the connection's destination
///
/// The destination is cleared first, so running the same import twice
/// leaves the same data behind. Malformed lines and per-record write
/// failures are counted in the summary; only I/O, connection and schema
/// failures return `Err`.
pub fn ingest_with(conn: &mut Connection, path: &Path, options: &IngestOptions) -> Result<ImportSummary> {
    // Open before touching the destination so a bad path leaves old data intact
    let file = File::open(path).map_err(|e| ConfigError::InvalidInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    conn.ensure_schema()?;
    let destination = conn.destination().clone();
    conn.backend_mut().begin_import(&destination, path)?;

    info!(
        source = %path.display(),
        backend = %conn.kind(),
        destination = %destination,
        batch_size = options.batch_size,
        workers = options.workers,
        "Starting import"
    );

    let start = Instant::now();
    let mut writer = BatchWriter::new(&mut *conn, options.batch_size);

    let outcome = if options.workers > 1 {
        pipeline::run_parallel(reader, &mut writer, options)
    } else {
        pipeline::run_sequential(reader, &mut writer, options)
    };

    // Flush what was accepted even if reading failed part way
    let stats = writer.finish();
    let (counts, completed) = outcome?;

    let summary = ImportSummary {
        lines_read: counts.lines_read,
        records_parsed: counts.records_parsed,
        lines_rejected: counts.lines_rejected,
        rejected_by_reason: counts.rejected_by_reason,
        records_written: stats.records_written,
        records_failed: stats.records_failed,
        batches_flushed: stats.batches_flushed,
        errors: stats.failures,
        duration: start.elapsed(),
        completed,
    };

    if let Some(progress) = &options.progress {
        progress.store(ProgressSnapshot {
            lines_read: summary.lines_read,
            records_parsed: summary.records_parsed,
            lines_rejected: summary.lines_rejected,
            records_written: summary.records_written,
        });
    }

    conn.backend_mut().finish_import(&destination, &summary)?;

    info!(
        lines = summary.lines_read,
        written = summary.records_written,
        rejected = summary.lines_rejected,
        failed = summary.records_failed,
        batches = summary.batches_flushed,
        completed = summary.completed,
        duration_ms = summary.duration.as_millis() as u64,
        "Import finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BackendConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const GOOD: &str = r#"203.0.113.9 (198.51.100.4) - - [10/Oct/2023:13:55:36 -0700] "GET /a/b/c HTTP/1.1" 200 512 45 7 "http://example.com/x" "TestAgent/1.0""#;

    fn log_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn memory_connection() -> Connection {
        crate::db::connect(&BackendConfig::sqlite(":memory:"), "import").unwrap()
    }

    #[test]
    fn test_ingest_counts() {
        let file = log_file(&[GOOD, "garbage", GOOD, "", GOOD]);
        let mut conn = memory_connection();

        let summary = ingest(&mut conn, file.path()).unwrap();
        assert_eq!(summary.lines_read, 5);
        assert_eq!(summary.records_parsed, 3);
        assert_eq!(summary.lines_rejected, 2);
        assert_eq!(summary.rejected_by_reason.get("malformed"), Some(&2));
        assert_eq!(summary.records_written, 3);
        assert_eq!(summary.batches_flushed, 1);
        assert!(summary.completed);
        assert!(!summary.is_clean());
        assert_eq!(conn.record_count().unwrap(), 3);
    }

    #[test]
    fn test_ingest_batches() {
        let lines = vec![GOOD; 7];
        let file = log_file(&lines);
        let mut conn = memory_connection();

        let options = IngestOptions::default().with_batch_size(3);
        let summary = ingest_with(&mut conn, file.path(), &options).unwrap();
        assert_eq!(summary.batches_flushed, 3);
        assert_eq!(summary.records_written, 7);
        assert!(summary.is_clean());
    }

    #[test]
    fn test_missing_file_keeps_existing_data() {
        let file = log_file(&[GOOD, GOOD]);
        let mut conn = memory_connection();
        ingest(&mut conn, file.path()).unwrap();

        let err = ingest(&mut conn, Path::new("/nonexistent/access.log")).unwrap_err();
        assert!(matches!(err, crate::error::LogsiftError::Config(_)));
        assert_eq!(conn.record_count().unwrap(), 2);
    }

    #[test]
    fn test_shutdown_before_start() {
        let file = log_file(&[GOOD, GOOD, GOOD]);
        let mut conn = memory_connection();
        let flag = Arc::new(AtomicBool::new(true));

        let options = IngestOptions::default().with_shutdown(flag);
        let summary = ingest_with(&mut conn, file.path(), &options).unwrap();
        assert!(!summary.completed);
        assert_eq!(summary.lines_read, 0);
        assert_eq!(summary.batches_flushed, 0);
    }

    #[test]
    fn test_progress_reflects_final_counts() {
        let file = log_file(&[GOOD, "nope"]);
        let mut conn = memory_connection();
        let progress = Arc::new(ImportProgress::default());

        let options = IngestOptions::default().with_progress(Arc::clone(&progress));
        ingest_with(&mut conn, file.path(), &options).unwrap();
        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                lines_read: 2,
                records_parsed: 1,
                lines_rejected: 1,
                records_written: 1,
            }
        );
    }
}
