//! Line reading and parsing loops
//!
//! Sequential mode reads, parses and pushes on the calling thread.
//! Parallel mode splits the work three ways:
//!
//! ```text
//! log-reader ──chunks of lines──▶ log-parser-0..N ──parsed chunks──▶ caller
//!                                                                    └─ BatchWriter
//! ```
//!
//! Only the calling thread touches the writer, so the sink never has to be
//! `Send`. Chunks carry line numbers and may arrive out of order; record
//! order within the destination is therefore only guaranteed sequentially.

use super::{ImportProgress, IngestOptions, ProgressSnapshot};
use crate::db::{BatchWriter, RecordSink};
use crate::error::{LogsiftError, ParseError, Result};
use crate::log::{parse_bytes, Record};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::debug;

/// Lines per chunk handed to a parser thread
const CHUNK_LINES: usize = 1024;

/// Chunks in flight per parser thread
const CHUNKS_PER_WORKER: usize = 2;

type LineChunk = Vec<(u64, Vec<u8>)>;
type ParsedChunk = Vec<(u64, std::result::Result<Record, ParseError>)>;

/// Line counters for one run
#[derive(Debug, Default)]
pub(crate) struct LineCounts {
    pub lines_read: u64,
    pub records_parsed: u64,
    pub lines_rejected: u64,
    pub rejected_by_reason: BTreeMap<&'static str, u64>,
}

/// Accumulates parse results and feeds accepted records to the writer
struct Tally<'p> {
    counts: LineCounts,
    progress: Option<&'p ImportProgress>,
}

impl<'p> Tally<'p> {
    fn new(progress: Option<&'p ImportProgress>) -> Self {
        Self {
            counts: LineCounts::default(),
            progress,
        }
    }

    fn accept<S: RecordSink + ?Sized>(
        &mut self,
        line_no: u64,
        result: std::result::Result<Record, ParseError>,
        writer: &mut BatchWriter<'_, S>,
    ) {
        self.counts.lines_read += 1;
        match result {
            Ok(record) => {
                self.counts.records_parsed += 1;
                writer.push(record);
            }
            Err(e) => {
                self.counts.lines_rejected += 1;
                *self.counts.rejected_by_reason.entry(e.label()).or_default() += 1;
                debug!(line = line_no, reason = %e, "Rejected line");
            }
        }

        if let Some(progress) = self.progress {
            progress.store(ProgressSnapshot {
                lines_read: self.counts.lines_read,
                records_parsed: self.counts.records_parsed,
                lines_rejected: self.counts.lines_rejected,
                records_written: writer.stats().records_written,
            });
        }
    }
}

/// Read and parse on the calling thread
///
/// Returns the counters and whether the whole input was consumed.
pub(crate) fn run_sequential<R, S>(
    mut reader: R,
    writer: &mut BatchWriter<'_, S>,
    options: &IngestOptions,
) -> Result<(LineCounts, bool)>
where
    R: BufRead,
    S: RecordSink + ?Sized,
{
    let mut tally = Tally::new(options.progress.as_deref());
    let mut buf = Vec::with_capacity(512);
    let mut line_no = 0u64;

    loop {
        if options.shutdown_requested() {
            debug!(line = line_no, "Shutdown requested, stopping import");
            return Ok((tally.counts, false));
        }

        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        tally.accept(line_no, parse_bytes(&buf), writer);
    }

    Ok((tally.counts, true))
}

/// Read on one thread, parse on `options.workers` threads, write here
pub(crate) fn run_parallel<R, S>(
    reader: R,
    writer: &mut BatchWriter<'_, S>,
    options: &IngestOptions,
) -> Result<(LineCounts, bool)>
where
    R: BufRead + Send,
    S: RecordSink + ?Sized,
{
    let workers = options.workers.max(1);
    let stop = AtomicBool::new(false);
    let mut tally = Tally::new(options.progress.as_deref());

    let completed = thread::scope(|scope| -> Result<bool> {
        let (line_tx, line_rx) = bounded::<LineChunk>(workers * CHUNKS_PER_WORKER);
        let (parsed_tx, parsed_rx) = bounded::<ParsedChunk>(workers * CHUNKS_PER_WORKER);

        let stop = &stop;
        let reader_handle = thread::Builder::new()
            .name("log-reader".to_string())
            .spawn_scoped(scope, move || read_chunks(reader, line_tx, stop))?;

        let mut parsers = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = line_rx.clone();
            let tx = parsed_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("log-parser-{}", id))
                .spawn_scoped(scope, move || parse_chunks(rx, tx))?;
            parsers.push(handle);
        }

        // Parsers hold the only clones now; channels close when they finish
        drop(line_rx);
        drop(parsed_tx);

        let mut completed = true;
        for chunk in parsed_rx {
            for (line_no, result) in chunk {
                tally.accept(line_no, result, writer);
            }
            if options.shutdown_requested() {
                debug!(lines = tally.counts.lines_read, "Shutdown requested, stopping import");
                stop.store(true, Ordering::Relaxed);
                completed = false;
                break;
            }
        }

        for handle in parsers {
            handle
                .join()
                .map_err(|_| LogsiftError::Worker("parser thread panicked".to_string()))?;
        }
        reader_handle
            .join()
            .map_err(|_| LogsiftError::Worker("reader thread panicked".to_string()))??;

        Ok(completed)
    })?;

    Ok((tally.counts, completed))
}

fn read_chunks<R: BufRead>(mut reader: R, tx: Sender<LineChunk>, stop: &AtomicBool) -> io::Result<()> {
    let mut chunk = Vec::with_capacity(CHUNK_LINES);
    let mut line_no = 0u64;

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut buf = Vec::new();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        chunk.push((line_no, buf));

        if chunk.len() == CHUNK_LINES {
            let full = std::mem::replace(&mut chunk, Vec::with_capacity(CHUNK_LINES));
            if tx.send(full).is_err() {
                // Every parser is gone
                return Ok(());
            }
        }
    }

    if !chunk.is_empty() {
        let _ = tx.send(chunk);
    }
    Ok(())
}

fn parse_chunks(rx: Receiver<LineChunk>, tx: Sender<ParsedChunk>) {
    for chunk in rx {
        let parsed: ParsedChunk = chunk
            .into_iter()
            .map(|(line_no, bytes)| (line_no, parse_bytes(&bytes)))
            .collect();
        if tx.send(parsed).is_err() {
            return;
        }
    }
}
