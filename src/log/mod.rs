//! Access-log records and line parsing

pub mod parser;
pub mod record;

pub use parser::{parse_bytes, parse_line};
pub use record::Record;
