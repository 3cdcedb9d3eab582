//! Batched record writer
//!
//! Buffers parsed records and hands them to a [`RecordSink`] in fixed-size
//! batches (1000 per batch default). A record that fails to persist is
//! logged and counted; it never stops the import.
//!
//! # Guarantees
//!
//! - Records reach the sink in the order they were pushed
//! - Every pushed record is flushed exactly once (a final partial batch is
//!   flushed by [`BatchWriter::finish`])
//! - Zero pushed records means zero sink calls

use crate::error::WriteError;
use crate::log::Record;
use tracing::{debug, warn};

/// Default number of records per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Anything that can persist a batch of records
pub trait RecordSink {
    /// Persist `records`, reporting which ones failed
    fn write_batch(&mut self, records: &[Record]) -> BatchOutcome;
}

/// Result of persisting one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Records persisted
    pub written: u64,

    /// Failures, by position within the batch
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    /// Every record in a batch of `len` failed for one shared reason
    pub fn batch_failed(len: usize, error: WriteError) -> Self {
        Self {
            written: 0,
            failures: vec![BatchFailure {
                index: 0,
                records: len,
                error,
            }],
        }
    }

    /// Number of records covered by failures
    pub fn failed_records(&self) -> u64 {
        self.failures.iter().map(|f| f.records as u64).sum()
    }
}

/// A failure inside one batch
#[derive(Debug)]
pub struct BatchFailure {
    /// Position of the first affected record within the batch
    pub index: usize,

    /// Consecutive records covered (1 for a single record)
    pub records: usize,

    /// What went wrong
    pub error: WriteError,
}

impl BatchFailure {
    /// Failure of the single record at `index`
    pub fn record(index: usize, error: WriteError) -> Self {
        Self {
            index,
            records: 1,
            error,
        }
    }
}

/// A write failure located in the whole import
#[derive(Debug)]
pub struct WriteFailure {
    /// 0-based sequence number of the first affected record
    pub sequence: u64,

    /// Consecutive records covered
    pub records: u64,

    /// What went wrong
    pub error: WriteError,
}

/// Statistics about write operations
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Records persisted
    pub records_written: u64,

    /// Records that failed to persist
    pub records_failed: u64,

    /// Sink calls made
    pub batches_flushed: u64,

    /// Individual failures, in import order
    pub failures: Vec<WriteFailure>,
}

/// Buffers records and flushes them to a sink in batches
pub struct BatchWriter<'a, S: RecordSink + ?Sized> {
    sink: &'a mut S,
    batch_size: usize,
    buffer: Vec<Record>,
    next_sequence: u64,
    stats: WriterStats,
}

impl<'a, S: RecordSink + ?Sized> BatchWriter<'a, S> {
    /// Create a writer; a batch size of 0 is treated as 1
    pub fn new(sink: &'a mut S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            next_sequence: 0,
            stats: WriterStats::default(),
        }
    }

    /// Buffer one record, flushing when the batch is full
    pub fn push(&mut self, record: Record) {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush();
        }
    }

    /// Buffer every record from `records`
    pub fn ingest<I: IntoIterator<Item = Record>>(&mut self, records: I) {
        for record in records {
            self.push(record);
        }
    }

    /// Flush buffered records to the sink
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let outcome = self.sink.write_batch(&self.buffer);
        let first = self.next_sequence;
        let len = self.buffer.len();

        self.stats.batches_flushed += 1;
        self.stats.records_written += outcome.written;
        self.stats.records_failed += outcome.failed_records();

        if !outcome.failures.is_empty() {
            warn!(
                batch = self.stats.batches_flushed,
                records = len,
                failed = outcome.failed_records(),
                "Batch had write failures"
            );
        }

        for failure in outcome.failures {
            let sequence = first + failure.index as u64;
            debug!(sequence, records = failure.records, error = %failure.error, "Write failed");
            self.stats.failures.push(WriteFailure {
                sequence,
                records: failure.records as u64,
                error: failure.error,
            });
        }

        debug!(
            batch = self.stats.batches_flushed,
            records = len,
            written = outcome.written,
            "Flushed batch"
        );

        self.next_sequence += len as u64;
        self.buffer.clear();
    }

    /// Records waiting for the next flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Configured batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Statistics so far
    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Flush the final partial batch and return the statistics
    pub fn finish(mut self) -> WriterStats {
        self.flush();
        std::mem::take(&mut self.stats)
    }
}
