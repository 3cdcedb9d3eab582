//! logsift - Access-Log Ingestion and Analytics
//!
//! Reads web-server access logs, turns each line into a structured
//! [`Record`](log::Record), and bulk-loads the records into one of three
//! storage backends. The relational backend also answers a fixed set of
//! analytics queries (top clients, error bursts, slow requests, busy
//! minutes and so on).
//!
//! # Features
//!
//! - **Strict Parsing**: Lines that do not match the access-log grammar are
//!   rejected and counted, never half-imported.
//!
//! - **Batched Writes**: Records are flushed in bounded batches inside one
//!   transaction (SQLite) or bulk operation (sled, Redis pipeline). A
//!   failing record is reported on its own without losing the rest of its
//!   batch.
//!
//! - **Three Backends**: SQLite tables, sled document collections and Redis
//!   hashes, selected once per connection.
//!
//! - **Safe Queries**: Every query is a fixed SQL template; user values are
//!   bound as parameters and the destination is a validated identifier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   access.log         │
//! └──────────┬───────────┘
//!            │ read_until('\n')
//!            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │  Parser (1 thread, or reader + N parser threads      │
//! │          over crossbeam bounded channels)            │
//! └──────────┬───────────────────────────────────────────┘
//!            │ Record / ParseError (counted)
//!            ▼
//! ┌──────────────────────┐
//! │   BatchWriter        │  flushes every N records
//! └──────────┬───────────┘
//!            │ BatchOutcome (per-record failures)
//!            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │  Connection → Backend                                │
//! │    Relational (SQLite) │ Document (sled) │ KV (Redis)│
//! └──────────┬───────────────────────────────────────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │   QueryEngine        │  relational only
//! └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Import into SQLite
//! logsift import access.log --db logs.db
//!
//! # Ten slowest requests
//! logsift query --db logs.db extreme-latency -n 10
//!
//! # 5xx groups over the last 15 minutes
//! logsift query --db logs.db server-errors --prefix 5 --minutes 15
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod log;
pub mod progress;
pub mod query;

pub use db::{close, connect, BackendConfig, BackendKind, Connection};
pub use error::{LogsiftError, Result};
pub use ingest::{ingest, ingest_with, ImportSummary, IngestOptions};
pub use log::{parse_line, Record};
pub use query::QueryEngine;
