//! Storage backends for imported records
//!
//! One import run talks to exactly one backend, selected when the
//! [`Connection`] is opened:
//! - Relational: SQLite table per destination, the only backend with the
//!   analytics query set
//! - Document: embedded sled database, one collection (tree) per destination
//! - Key-value: Redis hashes under the destination key
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Ingest pipeline                      │
//! │  - Parses lines into Records                          │
//! └──────────────────────┬───────────────────────────────┘
//!                        │ Record
//!                        ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                    BatchWriter                        │
//! │  - Buffers records (1000 per batch default)           │
//! │  - Aggregates per-record write failures               │
//! └──────────────────────┬───────────────────────────────┘
//!                        │ RecordSink::write_batch
//!                        ▼
//! ┌──────────────────────────────────────────────────────┐
//! │          Connection → Backend (closed enum)           │
//! │   Relational (SQLite) | Document (sled) | KV (Redis)  │
//! └──────────────────────────────────────────────────────┘
//! ```

#[cfg(feature = "document")]
pub mod document;
#[cfg(feature = "kv")]
pub mod kv;
pub mod schema;
pub mod sqlite;
pub mod writer;

#[cfg(feature = "document")]
pub use document::{filter_eq, DocumentBackend, DocumentFilter};
#[cfg(feature = "kv")]
pub use kv::KeyValueBackend;
pub use schema::ensure_schema;
pub use sqlite::SqliteBackend;
pub use writer::{
    BatchFailure, BatchOutcome, BatchWriter, RecordSink, WriteFailure, WriterStats,
    DEFAULT_BATCH_SIZE,
};

use crate::error::{BackendResult, ConnectionError, SchemaError};
use crate::ingest::ImportSummary;
use crate::log::Record;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Default destination name (table / collection / key)
pub const DEFAULT_DESTINATION: &str = "import";

/// Default SQLite database file
pub const DEFAULT_SQLITE_PATH: &str = "logsift.db";

/// Default sled database directory
pub const DEFAULT_DOCUMENT_PATH: &str = "logsift.docs";

/// Default Redis URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Maximum destination name length
const MAX_DESTINATION_LEN: usize = 63;

/// Which storage engine a connection uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// SQLite
    Relational,
    /// sled document collections
    Document,
    /// Redis hashes
    KeyValue,
}

impl BackendKind {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Relational => "relational",
            BackendKind::Document => "document",
            BackendKind::KeyValue => "key-value",
        }
    }

    /// Whether support for this backend was compiled in
    pub fn is_available(&self) -> bool {
        match self {
            BackendKind::Relational => true,
            BackendKind::Document => cfg!(feature = "document"),
            BackendKind::KeyValue => cfg!(feature = "kv"),
        }
    }

    /// Whether the analytics query set can run against this backend
    pub fn supports_queries(&self) -> bool {
        matches!(self, BackendKind::Relational)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relational" | "sqlite" | "sql" => Ok(BackendKind::Relational),
            "document" | "sled" | "doc" => Ok(BackendKind::Document),
            "kv" | "key-value" | "keyvalue" | "redis" => Ok(BackendKind::KeyValue),
            other => Err(format!(
                "unknown backend '{}': expected relational, document or kv",
                other
            )),
        }
    }
}

/// How the key-value backend maps records to keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyLayout {
    /// Every record is written to the destination key itself, so each
    /// write replaces the previous one and only the last record survives
    #[default]
    Single,
    /// Each record gets its own `<destination>:<seq>` key
    PerRecord,
}

impl KeyLayout {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            KeyLayout::Single => "single",
            KeyLayout::PerRecord => "per-record",
        }
    }
}

impl fmt::Display for KeyLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(KeyLayout::Single),
            "per-record" | "per_record" | "record" => Ok(KeyLayout::PerRecord),
            other => Err(format!(
                "unknown key layout '{}': expected single or per-record",
                other
            )),
        }
    }
}

/// Validated destination name
///
/// Restricted to `[A-Za-z_][A-Za-z0-9_]*` so it can be used as a SQL
/// identifier, a sled tree name and a Redis key prefix without escaping
/// surprises.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination(String);

impl Destination {
    /// Validate a destination name
    pub fn new(name: &str) -> Result<Self, ConnectionError> {
        let invalid = |reason: &str| ConnectionError::InvalidDestination {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let mut chars = name.chars();
        match chars.next() {
            None => return Err(invalid("name is empty")),
            Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
                return Err(invalid("must start with a letter or underscore"))
            }
            Some(_) => {}
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("only ASCII letters, digits and underscores are allowed"));
        }
        if name.len() > MAX_DESTINATION_LEN {
            return Err(invalid("name is longer than 63 characters"));
        }
        if name.eq_ignore_ascii_case("import_info") || name.to_ascii_lowercase().starts_with("sqlite_") {
            return Err(invalid("name is reserved"));
        }

        Ok(Self(name.to_string()))
    }

    /// Raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted SQL identifier
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Selected backend
    pub kind: BackendKind,

    /// SQLite database file (`:memory:` for an in-memory database)
    pub sqlite_path: PathBuf,

    /// sled database directory
    pub document_path: PathBuf,

    /// Redis connection URL
    pub redis_url: String,

    /// Key layout for the key-value backend
    pub kv_layout: KeyLayout,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Relational,
            sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            document_path: PathBuf::from(DEFAULT_DOCUMENT_PATH),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            kv_layout: KeyLayout::default(),
        }
    }
}

impl BackendConfig {
    /// SQLite backend at `path`
    pub fn sqlite<P: AsRef<Path>>(path: P) -> Self {
        Self {
            kind: BackendKind::Relational,
            sqlite_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Document backend rooted at `path`
    pub fn document<P: AsRef<Path>>(path: P) -> Self {
        Self {
            kind: BackendKind::Document,
            document_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Key-value backend at `url`
    pub fn key_value(url: &str, layout: KeyLayout) -> Self {
        Self {
            kind: BackendKind::KeyValue,
            redis_url: url.to_string(),
            kv_layout: layout,
            ..Default::default()
        }
    }

    /// Human-readable target for headers and logs
    pub fn target(&self) -> String {
        match self.kind {
            BackendKind::Relational => self.sqlite_path.display().to_string(),
            BackendKind::Document => self.document_path.display().to_string(),
            BackendKind::KeyValue => format!("{} ({} layout)", self.redis_url, self.kv_layout),
        }
    }
}

/// The storage engine behind a connection
pub enum Backend {
    /// SQLite
    Relational(SqliteBackend),

    /// sled document collections
    #[cfg(feature = "document")]
    Document(DocumentBackend),

    /// Redis hashes
    #[cfg(feature = "kv")]
    KeyValue(KeyValueBackend),
}

impl Backend {
    /// Open the backend described by `config`
    pub fn open(config: &BackendConfig) -> Result<Self, ConnectionError> {
        match config.kind {
            BackendKind::Relational => {
                SqliteBackend::open(&config.sqlite_path).map(Backend::Relational)
            }
            #[cfg(feature = "document")]
            BackendKind::Document => {
                DocumentBackend::open(&config.document_path).map(Backend::Document)
            }
            #[cfg(feature = "kv")]
            BackendKind::KeyValue => {
                KeyValueBackend::open(&config.redis_url, config.kv_layout).map(Backend::KeyValue)
            }
            #[allow(unreachable_patterns)]
            kind => Err(ConnectionError::Unavailable { kind }),
        }
    }

    /// Which variant this is
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Relational(_) => BackendKind::Relational,
            #[cfg(feature = "document")]
            Backend::Document(_) => BackendKind::Document,
            #[cfg(feature = "kv")]
            Backend::KeyValue(_) => BackendKind::KeyValue,
        }
    }

    /// Provision the destination and remove anything a previous import left
    /// there; returns the number of stale records removed
    pub fn prepare(&mut self, dest: &Destination) -> BackendResult<u64> {
        match self {
            Backend::Relational(db) => db.prepare(dest),
            #[cfg(feature = "document")]
            Backend::Document(db) => db.clear(dest),
            #[cfg(feature = "kv")]
            Backend::KeyValue(db) => db.clear(dest),
        }
    }

    /// Persist one batch, isolating per-record failures
    pub fn write_batch(&mut self, dest: &Destination, records: &[Record]) -> BatchOutcome {
        match self {
            Backend::Relational(db) => db.insert_batch(dest, records),
            #[cfg(feature = "document")]
            Backend::Document(db) => db.insert_many(dest, records),
            #[cfg(feature = "kv")]
            Backend::KeyValue(db) => db.write_batch(dest, records),
        }
    }

    /// Record that an import into `dest` from `source` is starting
    pub fn begin_import(&mut self, dest: &Destination, source: &Path) -> BackendResult<()> {
        match self {
            Backend::Relational(db) => db.begin_import(dest, source),
            #[allow(unreachable_patterns)]
            _ => Ok(()),
        }
    }

    /// Finalize the destination after an import
    pub fn finish_import(&mut self, dest: &Destination, summary: &ImportSummary) -> BackendResult<()> {
        match self {
            Backend::Relational(db) => db.finish_import(dest, summary),
            #[cfg(feature = "document")]
            Backend::Document(db) => db.flush(),
            #[cfg(feature = "kv")]
            Backend::KeyValue(_) => Ok(()),
        }
    }

    /// Number of records currently stored in `dest`
    pub fn count(&mut self, dest: &Destination) -> BackendResult<u64> {
        match self {
            Backend::Relational(db) => db.count(dest),
            #[cfg(feature = "document")]
            Backend::Document(db) => db.count(dest),
            #[cfg(feature = "kv")]
            Backend::KeyValue(db) => db.count(dest),
        }
    }

    /// Release the backend, flushing anything buffered
    pub fn close(self) -> BackendResult<()> {
        match self {
            Backend::Relational(db) => db.close(),
            #[cfg(feature = "document")]
            Backend::Document(db) => db.close(),
            #[cfg(feature = "kv")]
            Backend::KeyValue(_) => Ok(()),
        }
    }
}

/// An open backend bound to one destination
///
/// Holds the storage resource for the whole run; dropping it releases the
/// resource, [`Connection::close`] additionally reports close failures.
pub struct Connection {
    backend: Backend,
    destination: Destination,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.kind())
            .field("destination", &self.destination.as_str())
            .finish()
    }
}

impl Connection {
    /// Open a connection to `destination` on the configured backend
    pub fn open(config: &BackendConfig, destination: &str) -> Result<Self, ConnectionError> {
        let destination = Destination::new(destination)?;
        let backend = Backend::open(config)?;

        info!(
            backend = %backend.kind(),
            target = %config.target(),
            destination = %destination,
            "Connected"
        );

        Ok(Self {
            backend,
            destination,
        })
    }

    /// Wrap an already-open backend
    pub fn from_backend(backend: Backend, destination: &str) -> Result<Self, ConnectionError> {
        Ok(Self {
            backend,
            destination: Destination::new(destination)?,
        })
    }

    /// Backend variant in use
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Destination this connection reads and writes
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Underlying backend
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Underlying backend (mutable)
    pub fn backend_mut(&mut self) -> &mut Backend {
        &mut self.backend
    }

    /// Provision and clear the destination before an import
    pub fn ensure_schema(&mut self) -> Result<(), SchemaError> {
        schema::ensure_schema(&mut self.backend, &self.destination)
    }

    /// Number of records stored in the destination
    pub fn record_count(&mut self) -> BackendResult<u64> {
        self.backend.count(&self.destination)
    }

    /// Close the connection
    pub fn close(self) -> Result<(), ConnectionError> {
        let kind = self.backend.kind();
        self.backend.close().map_err(ConnectionError::Close)?;
        debug!(backend = %kind, "Connection closed");
        Ok(())
    }
}

impl RecordSink for Connection {
    fn write_batch(&mut self, records: &[Record]) -> BatchOutcome {
        self.backend.write_batch(&self.destination, records)
    }
}

/// Open a connection (see [`Connection::open`])
pub fn connect(config: &BackendConfig, destination: &str) -> Result<Connection, ConnectionError> {
    Connection::open(config, destination)
}

/// Close a connection (see [`Connection::close`])
pub fn close(connection: Connection) -> Result<(), ConnectionError> {
    connection.close()
}
