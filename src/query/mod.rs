//! Analytics over imported records
//!
//! - [`catalog`]: the static SQL catalog, one entry per operation
//! - [`engine`]: [`QueryEngine`], typed entry points with parameter checks
//! - [`functions`]: SQL helpers for verbatim timestamps, paths and referers
//! - [`rows`]: result row types, decoded and printed by column name

pub mod catalog;
pub mod engine;
pub mod functions;
pub mod rows;

pub use catalog::{get_query, QueryCategory, QueryDef, QUERY_CATALOG};
pub use engine::QueryEngine;
pub use rows::{DomainGroupCount, GroupCount, PeriodCount, SortField, TableRow};
