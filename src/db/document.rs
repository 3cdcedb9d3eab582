//! Document backend (sled)
//!
//! Each destination is a sled tree holding one JSON document per record,
//! keyed by a big-endian id from `generate_id` so iteration order matches
//! insertion order.

use crate::db::writer::{BatchFailure, BatchOutcome};
use crate::db::Destination;
use crate::error::{BackendResult, ConnectionError, WriteError};
use crate::log::Record;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level field equality filter, e.g. `{"status_code": 500}`
pub type DocumentFilter = Map<String, Value>;

/// Build a single-field equality filter
pub fn filter_eq(field: &str, value: impl Into<Value>) -> DocumentFilter {
    let mut filter = Map::new();
    filter.insert(field.to_string(), value.into());
    filter
}

/// Embedded document store
pub struct DocumentBackend {
    db: sled::Db,
    path: PathBuf,
}

impl DocumentBackend {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self, ConnectionError> {
        let db = sled::open(path).map_err(|e| ConnectionError::Document {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        debug!(path = %path.display(), "Opened document store");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Open a throwaway store that is removed on drop
    pub fn temporary() -> Result<Self, ConnectionError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| ConnectionError::Document {
                path: PathBuf::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            db,
            path: PathBuf::new(),
        })
    }

    /// Store location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the collection backing `dest`
    pub fn bind_collection(&self, dest: &Destination) -> BackendResult<sled::Tree> {
        Ok(self.db.open_tree(dest.as_str())?)
    }

    /// Remove every document, returning how many were removed
    pub fn clear(&self, dest: &Destination) -> BackendResult<u64> {
        let tree = self.bind_collection(dest)?;
        let removed = tree.len() as u64;
        tree.clear()?;
        Ok(removed)
    }

    /// Insert one document, returning its id
    pub fn insert_one(&self, dest: &Destination, record: &Record) -> BackendResult<u64> {
        let tree = self.bind_collection(dest)?;
        let id = self.db.generate_id()?;
        tree.insert(id.to_be_bytes().to_vec(), serde_json::to_vec(record)?)?;
        Ok(id)
    }

    /// Insert a batch atomically
    ///
    /// Records that fail to encode are reported individually; if the batch
    /// itself cannot be applied, every remaining record is reported failed.
    pub fn insert_many(&self, dest: &Destination, records: &[Record]) -> BatchOutcome {
        if records.is_empty() {
            return BatchOutcome::default();
        }

        let tree = match self.bind_collection(dest) {
            Ok(tree) => tree,
            Err(e) => return BatchOutcome::batch_failed(records.len(), WriteError(e)),
        };

        let mut outcome = BatchOutcome::default();
        let mut batch = sled::Batch::default();
        let mut staged = 0u64;

        for (index, record) in records.iter().enumerate() {
            let encoded: BackendResult<(u64, Vec<u8>)> = self
                .db
                .generate_id()
                .map_err(Into::into)
                .and_then(|id| Ok((id, serde_json::to_vec(record)?)));

            match encoded {
                Ok((id, doc)) => {
                    batch.insert(id.to_be_bytes().to_vec(), doc);
                    staged += 1;
                }
                Err(e) => outcome.failures.push(BatchFailure::record(index, WriteError(e))),
            }
        }

        match tree.apply_batch(batch) {
            Ok(()) => outcome.written = staged,
            Err(e) => return BatchOutcome::batch_failed(records.len(), WriteError(e.into())),
        }
        outcome
    }

    /// Documents whose top-level fields equal every entry in `filter`
    ///
    /// An empty filter matches everything. Results are in insertion order.
    pub fn find(&self, dest: &Destination, filter: &DocumentFilter) -> BackendResult<Vec<Record>> {
        let tree = self.bind_collection(dest)?;
        let mut found = Vec::new();

        for item in tree.iter() {
            let (_, bytes) = item?;
            let doc: Value = serde_json::from_slice(&bytes)?;
            let matches = filter
                .iter()
                .all(|(field, expected)| doc.get(field) == Some(expected));
            if matches {
                found.push(serde_json::from_value(doc)?);
            }
        }
        Ok(found)
    }

    /// Documents in the collection
    pub fn count(&self, dest: &Destination) -> BackendResult<u64> {
        Ok(self.bind_collection(dest)?.len() as u64)
    }

    /// Flush dirty pages to disk
    pub fn flush(&self) -> BackendResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Flush and release the store
    pub fn close(self) -> BackendResult<()> {
        self.flush()
    }
}
