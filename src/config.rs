//! Configuration types for logsift
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Reference-time parsing for windowed queries

use crate::db::{
    BackendConfig, BackendKind, Destination, KeyLayout, DEFAULT_BATCH_SIZE, DEFAULT_DESTINATION,
    DEFAULT_DOCUMENT_PATH, DEFAULT_REDIS_URL, DEFAULT_SQLITE_PATH,
};
use crate::error::ConfigError;
use crate::query::SortField;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 256;

/// Batch size limits
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 100_000;

/// Access-log importer and analytics
#[derive(Parser, Debug, Clone)]
#[command(
    name = "logsift",
    version,
    about = "Import access logs into SQLite, sled or Redis and run analytics queries",
    long_about = "Parses access-log lines into structured records and bulk-loads them into a\n\
                  relational (SQLite), document (sled) or key-value (Redis) store.\n\n\
                  Analytics queries run against the relational backend.",
    after_help = "EXAMPLES:\n    \
        logsift import access.log --db logs.db\n    \
        logsift import access.log --backend document --docs logs.docs -w 4\n    \
        logsift import access.log --backend kv --kv-layout per-record\n    \
        logsift query --db logs.db top-combos -n 20\n    \
        logsift query --db logs.db server-errors --prefix 5 --minutes 15\n    \
        logsift queries"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress progress and headers
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Import a log file into a destination
    Import(ImportArgs),

    /// Run an analytics query against a relational destination
    Query(QueryArgs),

    /// List the available analytics queries
    Queries {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Storage selection shared by `import` and `query`
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Storage backend: relational (sqlite), document (sled) or kv (redis)
    #[arg(long, default_value = "relational", value_name = "KIND")]
    pub backend: BackendKind,

    /// Destination table, collection or key prefix
    #[arg(long, default_value = DEFAULT_DESTINATION, value_name = "NAME")]
    pub dest: String,

    /// SQLite database file
    #[arg(long = "db", default_value = DEFAULT_SQLITE_PATH, value_name = "FILE")]
    pub sqlite_path: PathBuf,

    /// sled database directory
    #[arg(long = "docs", default_value = DEFAULT_DOCUMENT_PATH, value_name = "DIR")]
    pub document_path: PathBuf,

    /// Redis connection URL
    #[arg(long, default_value = DEFAULT_REDIS_URL, value_name = "URL")]
    pub redis_url: String,

    /// Key layout for the kv backend: single or per-record
    #[arg(long, default_value = "single", value_name = "LAYOUT")]
    pub kv_layout: KeyLayout,
}

/// Arguments for `logsift import`
#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Access log to import
    #[arg(value_name = "LOG_FILE")]
    pub input: PathBuf,

    #[command(flatten)]
    pub backend: BackendArgs,

    /// Records per bulk write
    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "NUM")]
    pub batch_size: usize,

    /// Parser threads (0 = one per CPU)
    #[arg(short = 'w', long, default_value_t = 1, value_name = "NUM")]
    pub workers: usize,
}

/// Arguments for `logsift query`
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Reference time for windowed queries (RFC 3339, default now)
    #[arg(long, value_name = "RFC3339")]
    pub now: Option<String>,

    /// Print rows as JSON instead of a table
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub query: QueryCommand,
}

/// One subcommand per analytics operation
#[derive(Subcommand, Debug, Clone)]
pub enum QueryCommand {
    /// Most frequent client / user-agent / referer / worker groups
    TopCombos {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Most frequent user agents
    TopUserAgents {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Group counts in the last N minutes
    RequestFrequency {
        #[arg(short = 'm', long, default_value_t = 60)]
        minutes: u64,
    },

    /// Group counts for a status prefix in the last N minutes
    ServerErrors {
        /// Leading status digits (e.g. 5, 50, 503)
        #[arg(short = 'p', long, default_value = "5")]
        prefix: String,

        #[arg(short = 'm', long, default_value_t = 60)]
        minutes: u64,
    },

    /// Slowest individual requests
    ExtremeLatency {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        /// Fastest first instead of slowest
        #[arg(long)]
        shortest: bool,
    },

    /// Group counts for a path segment at a depth
    PathDepth {
        /// 1-based segment position
        #[arg(short = 'd', long)]
        depth: usize,

        /// Segment value to match
        #[arg(short = 's', long)]
        segment: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Group counts across every request
    UpstreamCounts,

    /// Group counts with referring domain
    ConversionStats {
        /// count, domain, forwarded_for, user_agent, referer or upstream_worker_name
        #[arg(long, default_value = "count")]
        sort: SortField,
    },

    /// Every request in the last N seconds
    RequestsInWindow {
        #[arg(short = 's', long, default_value_t = 60)]
        seconds: u64,
    },

    /// Minutes with the most requests
    BusiestMinutes {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

impl QueryCommand {
    /// Catalog id of the operation
    pub fn query_id(&self) -> &'static str {
        use crate::query::catalog;
        match self {
            QueryCommand::TopCombos { .. } => catalog::TOP_COMBOS.id,
            QueryCommand::TopUserAgents { .. } => catalog::TOP_USER_AGENTS.id,
            QueryCommand::RequestFrequency { .. } => catalog::REQUEST_FREQUENCY.id,
            QueryCommand::ServerErrors { .. } => catalog::SERVER_ERRORS.id,
            QueryCommand::ExtremeLatency { .. } => catalog::EXTREME_LATENCY.id,
            QueryCommand::PathDepth { .. } => catalog::PATH_DEPTH.id,
            QueryCommand::UpstreamCounts => catalog::UPSTREAM_COUNTS.id,
            QueryCommand::ConversionStats { .. } => catalog::CONVERSION_STATS.id,
            QueryCommand::RequestsInWindow { .. } => catalog::REQUESTS_IN_WINDOW.id,
            QueryCommand::BusiestMinutes { .. } => catalog::BUSIEST_MINUTES.id,
        }
    }
}

impl BackendArgs {
    /// Validate and build the connection settings
    pub fn to_config(&self) -> Result<BackendConfig, ConfigError> {
        validate_destination(&self.dest)?;

        match self.backend {
            BackendKind::Relational => {
                if self.sqlite_path != Path::new(crate::db::sqlite::MEMORY_PATH) {
                    check_parent_exists(&self.sqlite_path)?;
                }
            }
            BackendKind::Document => check_parent_exists(&self.document_path)?,
            BackendKind::KeyValue => {}
        }

        Ok(BackendConfig {
            kind: self.backend,
            sqlite_path: self.sqlite_path.clone(),
            document_path: self.document_path.clone(),
            redis_url: self.redis_url.clone(),
            kv_layout: self.kv_layout,
        })
    }
}

/// Validated import configuration
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Log file to read
    pub input: PathBuf,

    /// Connection settings
    pub backend: BackendConfig,

    /// Destination name
    pub destination: String,

    /// Records per batch
    pub batch_size: usize,

    /// Parser threads
    pub workers: usize,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl ImportConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &ImportArgs, quiet: bool, verbose: bool) -> Result<Self, ConfigError> {
        if !args.input.is_file() {
            return Err(ConfigError::InvalidInput {
                path: args.input.clone(),
                reason: "File does not exist or is not a regular file".to_string(),
            });
        }

        if args.batch_size < MIN_BATCH_SIZE || args.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize {
                size: args.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        let workers = match args.workers {
            0 => num_cpus::get().min(MAX_WORKERS),
            n if n > MAX_WORKERS => {
                return Err(ConfigError::InvalidWorkerCount {
                    count: n,
                    max: MAX_WORKERS,
                })
            }
            n => n,
        };

        Ok(Self {
            input: args.input.clone(),
            backend: args.backend.to_config()?,
            destination: args.backend.dest.clone(),
            batch_size: args.batch_size,
            workers,
            show_progress: !quiet,
            verbose,
        })
    }
}

/// Validated query configuration
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Connection settings
    pub backend: BackendConfig,

    /// Destination name
    pub destination: String,

    /// Reference time override
    pub now: Option<DateTime<Utc>>,

    /// Operation and its parameters
    pub query: QueryCommand,

    /// JSON output
    pub json: bool,
}

impl QueryConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &QueryArgs) -> Result<Self, ConfigError> {
        let now = args.now.as_deref().map(parse_reference_time).transpose()?;

        Ok(Self {
            backend: args.backend.to_config()?,
            destination: args.backend.dest.clone(),
            now,
            query: args.query.clone(),
            json: args.json,
        })
    }
}

/// Parse an RFC 3339 reference time
pub fn parse_reference_time(value: &str) -> Result<DateTime<Utc>, ConfigError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConfigError::InvalidReferenceTime {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn validate_destination(name: &str) -> Result<(), ConfigError> {
    Destination::new(name).map(|_| ()).map_err(|e| ConfigError::InvalidDestination {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn check_parent_exists(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(ConfigError::InvalidOutputPath {
                path: path.to_path_buf(),
                reason: format!("Parent directory '{}' does not exist", parent.display()),
            });
        }
    }
    Ok(())
}
