//! Key-value backend (Redis)
//!
//! Records are stored as hashes whose fields are the canonical record
//! field names and whose values are strings. Two layouts:
//! - `single`: every record is written to the destination key, so each
//!   write overwrites the last and only the final record survives
//! - `per-record`: record N goes to `<destination>:<N>`

use crate::db::writer::{BatchFailure, BatchOutcome};
use crate::db::{Destination, KeyLayout};
use crate::error::{BackendResult, ConnectionError, WriteError};
use crate::log::Record;
use redis::{Client, Commands};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keys per DEL when clearing a per-record destination
const DELETE_CHUNK: usize = 1000;

/// Redis connection plus layout state
pub struct KeyValueBackend {
    conn: redis::Connection,
    url: String,
    layout: KeyLayout,
    next_sequence: u64,
}

impl KeyValueBackend {
    /// Connect to the server at `url`
    pub fn open(url: &str, layout: KeyLayout) -> Result<Self, ConnectionError> {
        let fail = |e: redis::RedisError| ConnectionError::KeyValue {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let client = Client::open(url).map_err(fail)?;
        let conn = client.get_connection_with_timeout(CONNECT_TIMEOUT).map_err(fail)?;

        if layout == KeyLayout::Single {
            warn!(
                url,
                "Single-key layout: each record overwrites the previous one, only the last survives"
            );
        }
        debug!(url, layout = %layout, "Connected to Redis");

        Ok(Self {
            conn,
            url: url.to_string(),
            layout,
            next_sequence: 0,
        })
    }

    /// Server URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Key layout in use
    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    /// Write one record's fields to `key`
    pub fn set_fields(&mut self, key: &str, record: &Record) -> BackendResult<()> {
        let pairs = record.field_pairs();
        self.conn.hset_multiple::<_, _, _, ()>(key, &pairs[..])?;
        Ok(())
    }

    /// Read a record back from `key`
    pub fn get_fields(&mut self, key: &str) -> BackendResult<Option<Record>> {
        let fields: HashMap<String, String> = self.conn.hgetall(key)?;
        Ok(record_from_fields(&fields))
    }

    /// Delete the destination key(s), returning how many keys were removed
    pub fn clear(&mut self, dest: &Destination) -> BackendResult<u64> {
        self.next_sequence = 0;

        let keys = self.keys(dest)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut removed = 0u64;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let n: u64 = self.conn.del(chunk)?;
            removed += n;
        }
        Ok(removed)
    }

    /// Write a batch in one pipeline
    ///
    /// If the pipeline fails, records are retried one at a time so that a
    /// failure is attributed to the record that caused it.
    pub fn write_batch(&mut self, dest: &Destination, records: &[Record]) -> BatchOutcome {
        if records.is_empty() {
            return BatchOutcome::default();
        }

        let first = self.next_sequence;
        self.next_sequence += records.len() as u64;

        let mut pipe = redis::pipe();
        for (offset, record) in records.iter().enumerate() {
            let key = record_key(self.layout, dest, first + offset as u64);
            pipe.hset_multiple(key, &record.field_pairs()[..]).ignore();
        }

        match pipe.query::<()>(&mut self.conn) {
            Ok(()) => BatchOutcome {
                written: records.len() as u64,
                failures: Vec::new(),
            },
            Err(e) => {
                debug!(error = %e, "Pipeline failed, retrying records individually");
                self.write_each(dest, records, first)
            }
        }
    }

    fn write_each(&mut self, dest: &Destination, records: &[Record], first: u64) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (index, record) in records.iter().enumerate() {
            let key = record_key(self.layout, dest, first + index as u64);
            match self.set_fields(&key, record) {
                Ok(()) => outcome.written += 1,
                Err(e) => outcome.failures.push(BatchFailure::record(index, WriteError(e))),
            }
        }
        outcome
    }

    /// Records currently stored for the destination
    pub fn count(&mut self, dest: &Destination) -> BackendResult<u64> {
        Ok(self.keys(dest)?.len() as u64)
    }

    fn keys(&mut self, dest: &Destination) -> BackendResult<Vec<String>> {
        let keys = match self.layout {
            KeyLayout::Single => {
                let exists: bool = self.conn.exists(dest.as_str())?;
                if exists {
                    vec![dest.to_string()]
                } else {
                    Vec::new()
                }
            }
            // SCAN may repeat a key across cursors
            KeyLayout::PerRecord => {
                let mut keys: Vec<String> = self.conn.scan_match(format!("{}:*", dest))?.collect();
                keys.sort_unstable();
                keys.dedup();
                keys
            }
        };
        Ok(keys)
    }
}

/// Key that record `sequence` is written to
pub fn record_key(layout: KeyLayout, dest: &Destination, sequence: u64) -> String {
    match layout {
        KeyLayout::Single => dest.to_string(),
        KeyLayout::PerRecord => format!("{}:{}", dest, sequence),
    }
}

/// Rebuild a record from its hash fields; `None` if any field is missing
/// or a number does not parse
pub fn record_from_fields(fields: &HashMap<String, String>) -> Option<Record> {
    let text = |name: &str| fields.get(name).cloned();
    Some(Record {
        client_address: text("client_address")?,
        forwarded_for: text("forwarded_for")?,
        timestamp: text("timestamp")?,
        request_line: text("request_line")?,
        status_code: fields.get("status_code")?.parse().ok()?,
        response_size: fields.get("response_size")?.parse().ok()?,
        time_taken: fields.get("time_taken")?.parse().ok()?,
        upstream_worker_name: text("upstream_worker_name")?,
        referer: text("referer")?,
        user_agent: text("user_agent")?,
    })
}
